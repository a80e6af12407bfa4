//! Hooks which apply definition changes.
//!
//! Each hook does the whole of one change against the connection it is given: it validates, writes the bookkeeping
//! rows, bumps the model's version, builds the new model, and runs the DDL.  Callers pass a transaction, so a failure
//! at any step leaves nothing behind.  What the process should learn about the change (registry, cache, listeners) is
//! returned as a [SchemaChange] for the caller to publish once the transaction has committed.
use std::sync::Arc;

use log::*;

use crate::cache::ModelCache;
use crate::config::Config;
use crate::descriptor::DynamicModel;
use crate::errors::{Error, Result};
use crate::factory::{FieldFactory, ModelFactory};
use crate::field::{FieldSchema, FieldSpec};
use crate::database::is_reserved_table;
use crate::introspection::{diff_table, table_exists};
use crate::model::{check_model_name, db_table, ModelSchema};
use crate::naming::model_class_name;
use crate::registry::AppRegistry;
use crate::schema::{synchronize, FieldSchemaEditor, ModelSchemaEditor};
use crate::signals::SchemaEvent;
use crate::store;

/// A committed-to-be change, waiting to be published.
#[derive(Debug)]
pub struct SchemaChange {
    /// The model schema after the change, or as it was for a deletion.
    pub schema: ModelSchema,
    /// The model to register.  `None` when the model went away.
    pub model: Option<Arc<DynamicModel>>,
    /// The name of a model to unregister before registering the new one.
    pub retired: Option<String>,
    pub event: SchemaEvent,
}

impl SchemaChange {
    /// Bring the registry and cache in line with the change.  Only call this after the transaction committed.
    pub fn publish(self, registry: &AppRegistry, cache: &ModelCache) -> SchemaEvent {
        if let Some(retired) = self.retired {
            // It may never have been registered; that's fine.
            let _ = registry.unregister_model(&self.schema.app_label, &retired);
            cache.clear_last_modified(&retired);
        }

        if let Some(model) = self.model {
            registry.register_model(model);
            cache.update_last_modified(&self.schema);
        }

        self.event
    }
}

pub struct Lifecycle<'a> {
    conn: &'a rusqlite::Connection,
    factory: ModelFactory<'a>,
    config: &'a Config,
}

impl<'a> Lifecycle<'a> {
    pub fn new(
        conn: &'a rusqlite::Connection,
        registry: &'a AppRegistry,
        config: &'a Config,
    ) -> Self {
        Self {
            conn,
            factory: ModelFactory::new(registry, config),
            config,
        }
    }

    /// The model as the bookkeeping tables currently describe it.
    fn load(&self, schema: &ModelSchema) -> Result<(Vec<FieldSchema>, DynamicModel)> {
        let fields = store::list_field_schemas(self.conn, schema.id)?;
        let model = self.factory.build(schema, &fields)?;
        Ok((fields, model))
    }

    /// Check that no other model schema of the app would share the table or the model name of `name`.
    ///
    /// The registry and the cache are keyed by model name, so two schemas must not differ only in how the name maps to
    /// a table.
    fn check_name_free(&self, app_label: &str, name: &str, except: Option<i64>) -> Result<()> {
        let table = db_table(app_label, name);
        if is_reserved_table(&table) {
            return Err(Error::InvalidModelName(name.to_string()));
        }
        if store::db_table_in_use(self.conn, &table, except)? {
            return Err(Error::DuplicateModel(table));
        }

        let model_name = model_class_name(name);
        let clash = store::list_model_schemas(self.conn, app_label)?
            .into_iter()
            .filter(|s| Some(s.id) != except)
            .any(|s| s.model_name().to_lowercase() == model_name.to_lowercase());
        if clash {
            return Err(Error::DuplicateModel(model_name));
        }
        Ok(())
    }

    pub fn model_schema_created(&self, app_label: &str, name: &str) -> Result<SchemaChange> {
        check_model_name(name)?;
        self.check_name_free(app_label, name, None)?;

        let schema = store::insert_model_schema(self.conn, app_label, name)?;
        let model = self.factory.build(&schema, &[])?;

        match diff_table(self.conn, &model)? {
            Some(diff) if !diff.removed.is_empty() => {
                return Err(Error::UnmanagedTable {
                    table: model.get_db_table().to_string(),
                    columns: diff.removed,
                });
            }
            Some(_) => {
                warn!(
                    "Table {} already exists, adopting it for {}",
                    model.get_db_table(),
                    model.get_model_name()
                );
                synchronize(self.conn, &model)?;
            }
            None => ModelSchemaEditor::new(self.conn).create_table(&model)?,
        }

        info!("Created model {} ({})", model.get_model_name(), schema.id);
        Ok(SchemaChange {
            event: SchemaEvent::ModelCreated {
                schema_id: schema.id,
                model_name: model.get_model_name().to_string(),
                db_table: model.get_db_table().to_string(),
            },
            schema,
            model: Some(Arc::new(model)),
            retired: None,
        })
    }

    pub fn model_schema_renamed(&self, id: i64, name: &str) -> Result<SchemaChange> {
        check_model_name(name)?;
        let initial_schema = store::get_model_schema(self.conn, id)?;
        self.check_name_free(&initial_schema.app_label, name, Some(id))?;

        let new_table = db_table(&initial_schema.app_label, name);
        if new_table != initial_schema.db_table() && table_exists(self.conn, &new_table)? {
            return Err(Error::DuplicateModel(new_table));
        }

        let (fields, initial) = self.load(&initial_schema)?;
        store::rename_model_schema(self.conn, id, name)?;
        let schema = store::touch_model_schema(self.conn, id)?;
        let model = self.factory.build(&schema, &fields)?;

        ModelSchemaEditor::with_initial(self.conn, &initial).update_table(&model)?;

        info!(
            "Renamed model {} to {}",
            initial.get_model_name(),
            model.get_model_name()
        );
        Ok(SchemaChange {
            event: SchemaEvent::ModelRenamed {
                schema_id: id,
                old_model_name: initial.get_model_name().to_string(),
                model_name: model.get_model_name().to_string(),
                db_table: model.get_db_table().to_string(),
                version: schema.version,
            },
            schema,
            model: Some(Arc::new(model)),
            retired: Some(initial.get_model_name().to_string()),
        })
    }

    pub fn model_schema_deleting(&self, id: i64) -> Result<SchemaChange> {
        let schema = store::get_model_schema(self.conn, id)?;
        let (_, model) = self.load(&schema)?;

        ModelSchemaEditor::new(self.conn).drop_table(&model)?;
        store::delete_model_schema(self.conn, id)?;

        info!("Deleted model {} ({})", model.get_model_name(), id);
        Ok(SchemaChange {
            event: SchemaEvent::ModelDeleted {
                schema_id: id,
                model_name: model.get_model_name().to_string(),
                db_table: model.get_db_table().to_string(),
            },
            schema,
            model: None,
            retired: Some(model.get_model_name().to_string()),
        })
    }

    /// Add a field to a model.  Returns the saved field too.
    pub fn field_schema_created(
        &self,
        model_id: i64,
        spec: FieldSpec,
    ) -> Result<(FieldSchema, SchemaChange)> {
        let spec = spec.resolve(self.config)?;
        let initial_schema = store::get_model_schema(self.conn, model_id)?;
        let (mut fields, initial) = self.load(&initial_schema)?;

        let column = spec.column_name();
        if initial.get_field(&column).is_some() {
            return Err(Error::DuplicateField {
                model: initial.get_model_name().to_string(),
                column,
            });
        }

        let field = store::insert_field_schema(self.conn, model_id, &spec)?;
        let schema = store::touch_model_schema(self.conn, model_id)?;
        fields.push(field.clone());
        let model = self.factory.build(&schema, &fields)?;

        let descriptor = FieldFactory::new(&field).make_field()?;
        FieldSchemaEditor::new(self.conn).add_column(&model, &descriptor)?;

        info!(
            "Added field {} to {} at {}",
            column,
            model.get_model_name(),
            schema.version
        );
        let change = SchemaChange {
            event: SchemaEvent::FieldAdded {
                schema_id: model_id,
                field_id: field.id,
                column,
                version: schema.version,
            },
            schema,
            model: Some(Arc::new(model)),
            retired: None,
        };
        Ok((field, change))
    }

    /// Change a field.  Renames are allowed; changing the kind, or making a nullable field NOT NULL, isn't.
    pub fn field_schema_updated(
        &self,
        field_id: i64,
        spec: FieldSpec,
    ) -> Result<(FieldSchema, SchemaChange)> {
        let spec = spec.resolve(self.config)?;
        let initial_field = store::get_field_schema(self.conn, field_id)?;
        initial_field.spec.check_change(&spec)?;

        let model_id = initial_field.model_id;
        let initial_schema = store::get_model_schema(self.conn, model_id)?;
        let (_, initial) = self.load(&initial_schema)?;

        let old_column = initial_field.column_name();
        let column = spec.column_name();
        if column != old_column && initial.get_field(&column).is_some() {
            return Err(Error::DuplicateField {
                model: initial.get_model_name().to_string(),
                column,
            });
        }

        store::update_field_schema(self.conn, field_id, &spec)?;
        let schema = store::touch_model_schema(self.conn, model_id)?;
        let (_, model) = self.load(&schema)?;
        let field = FieldSchema {
            id: field_id,
            model_id,
            spec,
        };

        let initial_descriptor = FieldFactory::new(&initial_field).make_field()?;
        let descriptor = FieldFactory::new(&field).make_field()?;
        FieldSchemaEditor::with_initial(self.conn, &initial_descriptor)
            .update_column(&model, &descriptor)?;

        info!(
            "Altered field {} of {} at {}",
            old_column,
            model.get_model_name(),
            schema.version
        );
        let change = SchemaChange {
            event: SchemaEvent::FieldAltered {
                schema_id: model_id,
                field_id,
                old_column,
                column,
                version: schema.version,
            },
            schema,
            model: Some(Arc::new(model)),
            retired: None,
        };
        Ok((field, change))
    }

    pub fn field_schema_deleting(&self, field_id: i64) -> Result<SchemaChange> {
        let field = store::get_field_schema(self.conn, field_id)?;
        let model_id = field.model_id;

        store::delete_field_schema(self.conn, field_id)?;
        let schema = store::touch_model_schema(self.conn, model_id)?;
        let (_, model) = self.load(&schema)?;

        let column = field.column_name();
        FieldSchemaEditor::new(self.conn).drop_column(&model, &column)?;

        info!(
            "Removed field {} of {} at {}",
            column,
            model.get_model_name(),
            schema.version
        );
        Ok(SchemaChange {
            event: SchemaEvent::FieldRemoved {
                schema_id: model_id,
                field_id,
                column,
                version: schema.version,
            },
            schema,
            model: Some(Arc::new(model)),
            retired: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::cache::LocalCache;
    use crate::database::Database;
    use crate::field::FieldKind;
    use crate::introspection::{column_allows_null, table_has_column};
    use crate::version::SchemaVersion;

    const APP: &str = "tests";

    fn db() -> Database {
        Database::with_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_create_model_creates_table() {
        let db = db();
        let registry = AppRegistry::new();
        let config = Config::default();
        let hooks = Lifecycle::new(db.connection(), &registry, &config);

        let change = hooks.model_schema_created(APP, "simple model").unwrap();
        assert!(table_exists(db.connection(), "tests_simple_model").unwrap());
        assert_eq!(change.schema.version, SchemaVersion::INITIAL);

        assert!(matches!(
            hooks.model_schema_created(APP, "Simple Model!"),
            Err(Error::DuplicateModel(_))
        ));
        assert!(matches!(
            hooks.model_schema_created(APP, "!!!"),
            Err(Error::InvalidModelName(_))
        ));
    }

    #[test]
    fn test_bookkeeping_tables_are_not_models() {
        let db = db();
        let registry = AppRegistry::new();
        let config = Config::default();
        let hooks = Lifecycle::new(db.connection(), &registry, &config);

        for name in ["modelschema", "fieldschema", "migrations", "ModelSchema"] {
            assert!(
                matches!(
                    hooks.model_schema_created("dynamic_models", name),
                    Err(Error::InvalidModelName(_))
                ),
                "{}",
                name
            );
        }
        assert!(matches!(
            hooks.model_schema_created("new_", "person"),
            Err(Error::InvalidModelName(_))
        ));

        let id = hooks
            .model_schema_created("dynamic_models", "person")
            .unwrap()
            .schema
            .id;
        assert!(matches!(
            hooks.model_schema_renamed(id, "migrations"),
            Err(Error::InvalidModelName(_))
        ));
        assert_eq!(
            store::list_model_schemas(db.connection(), "dynamic_models")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_model_names_must_differ() {
        let db = db();
        let registry = AppRegistry::new();
        let config = Config::default();
        let hooks = Lifecycle::new(db.connection(), &registry, &config);

        hooks.model_schema_created(APP, "simple model").unwrap();
        // Another table, but the same model name.
        assert!(matches!(
            hooks.model_schema_created(APP, "simplemodel"),
            Err(Error::DuplicateModel(_))
        ));
        assert!(!table_exists(db.connection(), "tests_simplemodel").unwrap());

        let other = hooks.model_schema_created(APP, "other").unwrap().schema.id;
        assert!(matches!(
            hooks.model_schema_renamed(other, "SimpleModel"),
            Err(Error::DuplicateModel(_))
        ));
        // Renaming a model onto its own model name is fine.
        hooks.model_schema_renamed(other, "OTHER").unwrap();
        // Other apps have their own names.
        hooks.model_schema_created("elsewhere", "simplemodel").unwrap();
    }

    #[test]
    fn test_publish_registers_and_caches() {
        let db = db();
        let registry = AppRegistry::new();
        let config = Config::default();
        let cache = ModelCache::new(Arc::new(LocalCache::new()), &config);
        let hooks = Lifecycle::new(db.connection(), &registry, &config);

        let change = hooks.model_schema_created(APP, "simple model").unwrap();
        let id = change.schema.id;
        // Nothing is visible until published.
        assert!(!registry.is_registered(APP, "SimpleModel"));
        change.publish(&registry, &cache);
        assert!(registry.is_registered(APP, "SimpleModel"));
        assert_eq!(
            cache.get_last_modified("SimpleModel").unwrap().version,
            SchemaVersion::INITIAL
        );

        let event = hooks
            .model_schema_renamed(id, "other model")
            .unwrap()
            .publish(&registry, &cache);
        assert!(matches!(event, SchemaEvent::ModelRenamed { .. }));
        assert!(!registry.is_registered(APP, "SimpleModel"));
        assert!(cache.get_last_modified("SimpleModel").is_none());
        assert_eq!(
            registry.get_model(APP, "OtherModel").unwrap().get_version(),
            SchemaVersion::new(2)
        );
        assert!(table_exists(db.connection(), "tests_other_model").unwrap());
        assert!(!table_exists(db.connection(), "tests_simple_model").unwrap());

        hooks
            .model_schema_deleting(id)
            .unwrap()
            .publish(&registry, &cache);
        assert!(!registry.is_registered(APP, "OtherModel"));
        assert!(!table_exists(db.connection(), "tests_other_model").unwrap());
    }

    #[test]
    fn test_field_hooks() {
        let db = db();
        let conn = db.connection();
        let registry = AppRegistry::new();
        let config = Config::default();
        let hooks = Lifecycle::new(conn, &registry, &config);
        let id = hooks.model_schema_created(APP, "m").unwrap().schema.id;

        let (field, change) = hooks
            .field_schema_created(id, FieldSpec::new("Title", FieldKind::Char).null(true))
            .unwrap();
        assert_eq!(field.spec.max_length, Some(255));
        assert_eq!(change.schema.version, SchemaVersion::new(2));
        assert!(table_has_column(conn, "tests_m", "title").unwrap());

        assert!(matches!(
            hooks.field_schema_created(id, FieldSpec::new("title", FieldKind::Text)),
            Err(Error::DuplicateField { .. })
        ));

        let (field, _) = hooks
            .field_schema_updated(
                field.id,
                FieldSpec::new("Heading", FieldKind::Char)
                    .max_length(80)
                    .null(true),
            )
            .unwrap();
        assert!(table_has_column(conn, "tests_m", "heading").unwrap());
        assert!(!table_has_column(conn, "tests_m", "title").unwrap());

        assert!(matches!(
            hooks.field_schema_updated(
                field.id,
                FieldSpec::new("Heading", FieldKind::Char).max_length(80)
            ),
            Err(Error::NullFieldChanged { .. })
        ));
        assert_eq!(
            column_allows_null(conn, "tests_m", "heading").unwrap(),
            Some(true)
        );

        let change = hooks.field_schema_deleting(field.id).unwrap();
        assert!(!table_has_column(conn, "tests_m", "heading").unwrap());
        assert_eq!(change.schema.version, SchemaVersion::new(4));
        assert!(change.model.unwrap().get_field("heading").is_none());
    }
}
