//! Tracking when model schemas last changed.
//!
//! Every change to a model schema records the new [SchemaVersion] under a per-model key.  Before a dynamic model is
//! used for reading or writing rows, its version is checked against this marker so that a model declared before a
//! schema change is not used against the changed table.  The cache is only an optimization: when a marker is missing
//! or expired, the version is read back from the bookkeeping tables.
//!
//! The storage behind the markers is the [LastModifiedCache] trait.  [LocalCache] keeps them in process memory, which
//! is right for a single process; several processes sharing a database want an implementation backed by something
//! they all see.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::config::Config;
use crate::model::ModelSchema;
use crate::version::SchemaVersion;

/// The marker stored per model.
///
/// The schema id is part of the marker since a name can be reused: a model may be renamed or deleted and another
/// created under its old name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LastModified {
    pub schema_id: i64,
    pub version: SchemaVersion,
    pub at: OffsetDateTime,
}

/// Storage for last-modified markers.
pub trait LastModifiedCache: Send + Sync {
    /// Get a marker, or `None` if it is missing or has expired.
    fn get(&self, key: &str) -> Option<LastModified>;

    fn set(&self, key: &str, value: LastModified, timeout: Duration);

    fn delete(&self, key: &str);

    fn clear(&self);
}

/// A [LastModifiedCache] in process memory.
#[derive(Default)]
pub struct LocalCache {
    /// `None` expiry means the timeout was too long to represent, so the entry never expires.
    entries: Mutex<HashMap<String, (LastModified, Option<Instant>)>>,
}

impl LocalCache {
    pub fn new() -> LocalCache {
        Default::default()
    }
}

impl LastModifiedCache for LocalCache {
    fn get(&self, key: &str) -> Option<LastModified> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let found = entries.get(key).copied();
        match found {
            Some((value, None)) => Some(value),
            Some((value, Some(expires))) if expires > Instant::now() => Some(value),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: LastModified, timeout: Duration) {
        let expires = Instant::now().checked_add(timeout);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value, expires));
    }

    fn delete(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Last-modified markers for models, keyed by model name.
#[derive(Clone)]
pub struct ModelCache {
    backend: Arc<dyn LastModifiedCache>,
    key_prefix: String,
    timeout: Duration,
}

impl ModelCache {
    pub fn new(backend: Arc<dyn LastModifiedCache>, config: &Config) -> ModelCache {
        ModelCache {
            backend,
            key_prefix: config.cache_key_prefix.clone(),
            timeout: config.cache_timeout,
        }
    }

    pub fn cache_key(&self, model_name: &str) -> String {
        format!("{}{}", self.key_prefix, model_name.to_lowercase())
    }

    pub fn get_last_modified(&self, model_name: &str) -> Option<LastModified> {
        self.backend.get(&self.cache_key(model_name))
    }

    /// Record the state a model schema is now in.
    pub fn update_last_modified(&self, schema: &ModelSchema) -> LastModified {
        let marker = LastModified {
            schema_id: schema.id,
            version: schema.version,
            at: schema.modified,
        };
        self.set_last_modified(&schema.model_name(), marker);
        marker
    }

    pub fn set_last_modified(&self, model_name: &str, marker: LastModified) {
        self.backend
            .set(&self.cache_key(model_name), marker, self.timeout);
    }

    pub fn clear_last_modified(&self, model_name: &str) {
        self.backend.delete(&self.cache_key(model_name));
    }

    pub fn clear(&self) {
        self.backend.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MODEL_NAME: &str = "Test";

    fn cache_with_timeout(timeout: Duration) -> ModelCache {
        let config = Config {
            cache_timeout: timeout,
            ..Default::default()
        };
        ModelCache::new(Arc::new(LocalCache::new()), &config)
    }

    fn marker(version: u64) -> LastModified {
        LastModified {
            schema_id: 1,
            version: SchemaVersion::new(version),
            at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_cache_key() {
        let cache = cache_with_timeout(Duration::from_secs(10));
        assert_eq!(cache.cache_key("SimpleModel"), "dynamic_models_simplemodel");
    }

    #[test]
    fn test_get_and_set_last_modified() {
        let cache = cache_with_timeout(Duration::from_secs(10));
        assert_eq!(cache.get_last_modified(TEST_MODEL_NAME), None);
        let m = marker(3);
        cache.set_last_modified(TEST_MODEL_NAME, m);
        assert_eq!(cache.get_last_modified(TEST_MODEL_NAME), Some(m));
        // Keys are case-insensitive.
        assert!(cache.get_last_modified("test").is_some());
    }

    #[test]
    fn test_update_last_modified_from_schema() {
        let cache = cache_with_timeout(Duration::from_secs(10));
        let schema = ModelSchema {
            id: 4,
            name: "simple model".into(),
            app_label: "tests".into(),
            version: SchemaVersion::new(2),
            modified: OffsetDateTime::now_utc(),
        };
        let m = cache.update_last_modified(&schema);
        assert_eq!(m.schema_id, 4);
        assert_eq!(m.version, SchemaVersion::new(2));
        assert_eq!(cache.get_last_modified("SimpleModel"), Some(m));
    }

    #[test]
    fn test_delete_last_modified() {
        let cache = cache_with_timeout(Duration::from_secs(10));
        cache.set_last_modified(TEST_MODEL_NAME, marker(1));
        assert!(cache.get_last_modified(TEST_MODEL_NAME).is_some());
        cache.clear_last_modified(TEST_MODEL_NAME);
        assert_eq!(cache.get_last_modified(TEST_MODEL_NAME), None);
    }

    #[test]
    fn test_entries_expire() {
        let cache = cache_with_timeout(Duration::from_millis(1));
        cache.set_last_modified(TEST_MODEL_NAME, marker(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get_last_modified(TEST_MODEL_NAME), None);
    }

    #[test]
    fn test_clear() {
        let cache = cache_with_timeout(Duration::from_secs(10));
        cache.set_last_modified("a", marker(1));
        cache.set_last_modified("b", marker(1));
        cache.clear();
        assert_eq!(cache.get_last_modified("a"), None);
        assert_eq!(cache.get_last_modified("b"), None);
    }
}
