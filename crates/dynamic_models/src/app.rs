//! The facade tying definitions, tables, and rows together.
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::*;

use crate::cache::{LastModifiedCache, LocalCache, ModelCache};
use crate::config::Config;
use crate::database::Database;
use crate::descriptor::DynamicModel;
use crate::errors::{Error, Result};
use crate::factory::ModelFactory;
use crate::field::{FieldSchema, FieldSpec};
use crate::introspection;
use crate::lifecycle::{Lifecycle, SchemaChange};
use crate::model::ModelSchema;
use crate::records;
use crate::registry::AppRegistry;
use crate::schema::{synchronize, SyncOutcome};
use crate::signals::{SchemaEvent, Signals};
use crate::store;

/// Models defined at run time, stored in one sqlite database.
///
/// All operations go through one connection behind a mutex, so they are serialized within a process.  Definition
/// changes each run in one transaction together with their DDL; the registry and cache learn about a change only once
/// it has committed, and listeners hear about it after the connection has been released.
pub struct DynamicModels {
    db: Mutex<Database>,
    registry: Arc<AppRegistry>,
    cache: ModelCache,
    config: Config,
    signals: Signals,
}

impl DynamicModels {
    /// Open (creating if needed) the database in the given directory.
    pub fn open(dir: &Path, config: Config) -> Result<DynamicModels> {
        Self::with_parts(
            Database::open(dir)?,
            config,
            Arc::new(AppRegistry::new()),
            Arc::new(LocalCache::new()),
        )
    }

    /// Use an already-open connection, e.g. `Connection::open_in_memory`.
    pub fn with_connection(conn: rusqlite::Connection, config: Config) -> Result<DynamicModels> {
        Self::with_parts(
            Database::with_connection(conn)?,
            config,
            Arc::new(AppRegistry::new()),
            Arc::new(LocalCache::new()),
        )
    }

    /// Full control: pass [AppRegistry::global] to share models with the rest of the process, or a cache backend
    /// shared with other processes using the same database.
    ///
    /// Every saved model is declared and registered before this returns.
    pub fn with_parts(
        db: Database,
        config: Config,
        registry: Arc<AppRegistry>,
        cache_backend: Arc<dyn LastModifiedCache>,
    ) -> Result<DynamicModels> {
        let cache = ModelCache::new(cache_backend, &config);
        let ret = DynamicModels {
            db: Mutex::new(db),
            registry,
            cache,
            config,
            signals: Signals::new(),
        };

        let count = {
            let db = ret.lock();
            let conn = db.connection();
            let schemas = store::list_model_schemas(conn, &ret.config.app_label)?;
            for schema in schemas.iter() {
                ret.declare(conn, schema)?;
            }
            schemas.len()
        };
        info!(
            "Declared {} dynamic models for {}",
            count, ret.config.app_label
        );

        Ok(ret)
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn factory(&self) -> ModelFactory<'_> {
        ModelFactory::new(&self.registry, &self.config)
    }

    /// Get the registered model for a schema, rebuilding it if it's stale.
    fn declare(&self, conn: &rusqlite::Connection, schema: &ModelSchema) -> Result<Arc<DynamicModel>> {
        let fields = store::list_field_schemas(conn, schema.id)?;
        self.factory().get_model(schema, &fields)
    }

    /// Run one definition change in a transaction, then publish it.
    fn change<T>(&self, f: impl FnOnce(&Lifecycle) -> Result<(T, SchemaChange)>) -> Result<T> {
        let event;
        let ret;
        {
            let mut db = self.lock();
            let tx = db.transaction()?;
            let (value, change) = {
                let hooks = Lifecycle::new(&tx, &self.registry, &self.config);
                f(&hooks)?
            };
            tx.commit()?;
            event = change.publish(&self.registry, &self.cache);
            ret = value;
        }

        self.signals.send(&event);
        Ok(ret)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AppRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Create a model and its table.
    pub fn create_model(&self, name: &str) -> Result<ModelSchema> {
        self.change(|hooks| {
            let change = hooks.model_schema_created(&self.config.app_label, name)?;
            Ok((change.schema.clone(), change))
        })
    }

    /// Rename a model.  Its table is renamed along with it and its rows are kept.
    pub fn rename_model(&self, id: i64, name: &str) -> Result<ModelSchema> {
        self.change(|hooks| {
            let change = hooks.model_schema_renamed(id, name)?;
            Ok((change.schema.clone(), change))
        })
    }

    /// Delete a model, dropping its table.
    pub fn delete_model(&self, id: i64) -> Result<()> {
        self.change(|hooks| Ok(((), hooks.model_schema_deleting(id)?)))
    }

    pub fn add_field(&self, model_id: i64, spec: FieldSpec) -> Result<FieldSchema> {
        self.change(|hooks| hooks.field_schema_created(model_id, spec))
    }

    pub fn update_field(&self, field_id: i64, spec: FieldSpec) -> Result<FieldSchema> {
        self.change(|hooks| hooks.field_schema_updated(field_id, spec))
    }

    /// Remove a field, dropping its column and the data in it.
    pub fn delete_field(&self, field_id: i64) -> Result<()> {
        self.change(|hooks| Ok(((), hooks.field_schema_deleting(field_id)?)))
    }

    pub fn model_schema(&self, id: i64) -> Result<ModelSchema> {
        store::get_model_schema(self.lock().connection(), id)
    }

    /// Find a model schema of this app by its name.
    pub fn find_model_schema(&self, name: &str) -> Result<Option<ModelSchema>> {
        store::find_model_schema(self.lock().connection(), &self.config.app_label, name)
    }

    /// The model schemas of this app, oldest first.
    pub fn model_schemas(&self) -> Result<Vec<ModelSchema>> {
        store::list_model_schemas(self.lock().connection(), &self.config.app_label)
    }

    /// Whether a table exists in the database, dynamic or not.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        introspection::table_exists(self.lock().connection(), table)
    }

    pub fn fields(&self, model_id: i64) -> Result<Vec<FieldSchema>> {
        let db = self.lock();
        // Distinguish a model without fields from no model at all.
        store::get_model_schema(db.connection(), model_id)?;
        store::list_field_schemas(db.connection(), model_id)
    }

    /// The current model for a model schema.
    pub fn get_dynamic_model(&self, id: i64) -> Result<Arc<DynamicModel>> {
        let db = self.lock();
        let schema = store::get_model_schema(db.connection(), id)?;
        self.declare(db.connection(), &schema)
    }

    /// The current model for the model schema with this name.
    ///
    /// Fails with [Error::UnsavedSchema] if there is no such schema.
    pub fn get_dynamic_model_by_name(&self, name: &str) -> Result<Arc<DynamicModel>> {
        let db = self.lock();
        let schema = store::find_model_schema(db.connection(), &self.config.app_label, name)?
            .ok_or_else(|| Error::UnsavedSchema(name.to_string()))?;
        self.declare(db.connection(), &schema)
    }

    /// Make every table of this app match its definition, returning what had to be done per model.
    ///
    /// Meant for startup, to converge tables after a crash or after someone edited them by hand.  Runs in one
    /// transaction.
    pub fn synchronize_all(&self) -> Result<Vec<(String, SyncOutcome)>> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let mut ret = vec![];
        for schema in store::list_model_schemas(&tx, &self.config.app_label)? {
            let model = self.declare(&tx, &schema)?;
            let outcome = synchronize(&tx, &model)?;
            if outcome != SyncOutcome::Unchanged {
                info!("Synchronized {}: {:?}", model.get_db_table(), outcome);
            }
            ret.push((model.get_model_name().to_string(), outcome));
        }
        tx.commit()?;
        Ok(ret)
    }

    /// Connect a listener for definition changes, replacing any listener with the same `dispatch_uid`.
    pub fn connect(
        &self,
        dispatch_uid: impl Into<String>,
        listener: impl Fn(&SchemaEvent) + Send + Sync + 'static,
    ) {
        self.signals.connect(dispatch_uid, listener);
    }

    pub fn disconnect(&self, dispatch_uid: &str) -> bool {
        self.signals.disconnect(dispatch_uid)
    }

    /// Insert a row, returning its id.  See [records::insert].
    pub fn insert(&self, model: &DynamicModel, value: &impl serde::Serialize) -> Result<i64> {
        records::insert(self.lock().connection(), &self.cache, model, value)
    }

    /// Update the given columns of a row.  Returns whether the row exists.
    pub fn update(
        &self,
        model: &DynamicModel,
        id: i64,
        value: &impl serde::Serialize,
    ) -> Result<bool> {
        records::update(self.lock().connection(), &self.cache, model, id, value)
    }

    pub fn get<T: serde::de::DeserializeOwned>(
        &self,
        model: &DynamicModel,
        id: i64,
    ) -> Result<Option<T>> {
        records::get(self.lock().connection(), &self.cache, model, id)
    }

    /// Load every row.  See [records::load].
    ///
    /// The connection is held while the callback runs, so the callback must not call back into this object.
    pub fn load<T: serde::de::DeserializeOwned>(
        &self,
        model: &DynamicModel,
        callback: impl FnMut(T) -> anyhow::Result<()>,
    ) -> Result<()> {
        records::load(self.lock().connection(), &self.cache, model, callback)
    }

    pub fn delete(&self, model: &DynamicModel, id: i64) -> Result<bool> {
        records::delete(self.lock().connection(), &self.cache, model, id)
    }

    pub fn count(&self, model: &DynamicModel) -> Result<u64> {
        records::count(self.lock().connection(), &self.cache, model)
    }
}
