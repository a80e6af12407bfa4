//! The registry of declared dynamic models.
//!
//! The registry maps `(app_label, model_name)` to the active [DynamicModel].  Model names are case-insensitive.  The
//! map is published through an [ArcSwap], so lookups are a pointer load and never wait on writers; writers copy the
//! map, which is fine because models are few and change rarely compared to how often they are looked up.
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use lazy_static::lazy_static;
use log::*;

use crate::descriptor::DynamicModel;
use crate::errors::{Error, Result};

type AppModels = HashMap<String, Arc<DynamicModel>>;

#[derive(Default)]
pub struct AppRegistry {
    apps: ArcSwap<HashMap<String, AppModels>>,
}

lazy_static! {
    static ref GLOBAL: Arc<AppRegistry> = Arc::new(AppRegistry::new());
}

fn model_key(model_name: &str) -> String {
    model_name.to_lowercase()
}

impl AppRegistry {
    pub fn new() -> AppRegistry {
        Default::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<AppRegistry> {
        GLOBAL.clone()
    }

    pub fn try_get_model(&self, app_label: &str, model_name: &str) -> Option<Arc<DynamicModel>> {
        self.apps
            .load()
            .get(app_label)
            .and_then(|models| models.get(&model_key(model_name)))
            .cloned()
    }

    pub fn get_model(&self, app_label: &str, model_name: &str) -> Result<Arc<DynamicModel>> {
        self.try_get_model(app_label, model_name)
            .ok_or_else(|| Error::NotRegistered {
                app_label: app_label.to_string(),
                model_name: model_name.to_string(),
            })
    }

    pub fn is_registered(&self, app_label: &str, model_name: &str) -> bool {
        self.try_get_model(app_label, model_name).is_some()
    }

    /// Register a model, returning the model it replaced if any.
    pub fn register_model(&self, model: Arc<DynamicModel>) -> Option<Arc<DynamicModel>> {
        let key = model_key(model.get_model_name());
        debug!(
            "Registering {}.{} at {}",
            model.get_app_label(),
            model.get_model_name(),
            model.get_version()
        );

        let mut replaced = None;
        self.apps.rcu(|apps| {
            let mut apps = HashMap::clone(apps);
            replaced = apps
                .entry(model.get_app_label().to_string())
                .or_default()
                .insert(key.clone(), model.clone());
            apps
        });
        replaced
    }

    /// Remove a model from the registry.
    ///
    /// Fails with [Error::NotRegistered] if the model isn't there.
    pub fn unregister_model(&self, app_label: &str, model_name: &str) -> Result<Arc<DynamicModel>> {
        let key = model_key(model_name);
        let mut removed = None;
        self.apps.rcu(|apps| {
            let mut apps = HashMap::clone(apps);
            removed = apps.get_mut(app_label).and_then(|models| models.remove(&key));
            apps
        });

        match removed {
            Some(m) => {
                debug!("Unregistered {}.{}", app_label, model_name);
                Ok(m)
            }
            None => Err(Error::NotRegistered {
                app_label: app_label.to_string(),
                model_name: model_name.to_string(),
            }),
        }
    }

    /// All the models registered under an app label.
    pub fn models_for_app(&self, app_label: &str) -> Vec<Arc<DynamicModel>> {
        self.apps
            .load()
            .get(app_label)
            .map(|models| models.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget every model of an app.
    pub fn clear_app(&self, app_label: &str) {
        self.apps.rcu(|apps| {
            let mut apps = HashMap::clone(apps);
            apps.remove(app_label);
            apps
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::descriptor::ModelBuilder;
    use crate::version::SchemaVersion;

    fn model(app_label: &str, name: &str, version: u64) -> Arc<DynamicModel> {
        Arc::new(
            ModelBuilder::new(
                app_label.into(),
                name.into(),
                format!("{}_{}", app_label, name.to_lowercase()),
                name.into(),
                1,
                SchemaVersion::new(version),
            )
            .build(),
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = AppRegistry::new();
        assert!(!registry.is_registered("app", "Thing"));
        assert!(registry.register_model(model("app", "Thing", 1)).is_none());
        assert!(registry.is_registered("app", "thing"));
        assert_eq!(registry.get_model("app", "THING").unwrap().get_model_name(), "Thing");
        assert!(!registry.is_registered("other", "Thing"));
    }

    #[test]
    fn test_register_replaces() {
        let registry = AppRegistry::new();
        registry.register_model(model("app", "Thing", 1));
        let replaced = registry.register_model(model("app", "Thing", 2)).unwrap();
        assert_eq!(replaced.get_version(), SchemaVersion::new(1));
        assert_eq!(
            registry.get_model("app", "Thing").unwrap().get_version(),
            SchemaVersion::new(2)
        );
        assert_eq!(registry.models_for_app("app").len(), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = AppRegistry::new();
        registry.register_model(model("app", "Thing", 1));
        registry.unregister_model("app", "Thing").unwrap();
        assert!(!registry.is_registered("app", "Thing"));
        assert!(matches!(
            registry.unregister_model("app", "Thing"),
            Err(Error::NotRegistered { .. })
        ));
        assert!(matches!(
            registry.get_model("app", "Thing"),
            Err(Error::NotRegistered { .. })
        ));
    }

    #[test]
    fn test_clear_app() {
        let registry = AppRegistry::new();
        registry.register_model(model("app", "A", 1));
        registry.register_model(model("app", "B", 1));
        registry.register_model(model("other", "A", 1));
        registry.clear_app("app");
        assert!(registry.models_for_app("app").is_empty());
        assert!(registry.is_registered("other", "A"));
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let registry = AppRegistry::new();
        registry.register_model(model("app", "Thing", 1));
        let held = registry.get_model("app", "Thing").unwrap();
        registry.register_model(model("app", "Thing", 2));
        assert_eq!(held.get_version(), SchemaVersion::new(1));
    }
}
