//! Building dynamic models from their schemas.
//!
//! A model is assembled from the implicit primary key, the configured default fields, and the schema's own fields, in
//! that order.  Building is pure; registering is a separate step so that callers changing the database can build the
//! new model inside their transaction and only publish it once the transaction commits.
use std::sync::Arc;

use log::*;

use crate::config::Config;
use crate::descriptor::{ColumnDescriptor, DynamicModel, ModelBuilder};
use crate::errors::{Error, Result};
use crate::field::FieldSchema;
use crate::model::ModelSchema;
use crate::registry::AppRegistry;

/// Makes the column for one field.
pub struct FieldFactory<'a> {
    field: &'a FieldSchema,
}

impl<'a> FieldFactory<'a> {
    pub fn new(field: &'a FieldSchema) -> Self {
        Self { field }
    }

    pub fn make_field(&self) -> Result<ColumnDescriptor> {
        ColumnDescriptor::from_spec(&self.field.spec)
    }
}

pub struct ModelFactory<'a> {
    registry: &'a AppRegistry,
    config: &'a Config,
}

impl<'a> ModelFactory<'a> {
    pub fn new(registry: &'a AppRegistry, config: &'a Config) -> Self {
        Self { registry, config }
    }

    /// Whether `model` was built from this exact version of `schema`.
    pub fn is_current(schema: &ModelSchema, model: &DynamicModel) -> bool {
        model.get_schema_id() == schema.id && model.get_version() == schema.version
    }

    /// Get the registered model for a schema, building and registering a new one if it's missing or stale.
    pub fn get_model(
        &self,
        schema: &ModelSchema,
        fields: &[FieldSchema],
    ) -> Result<Arc<DynamicModel>> {
        if let Some(model) = self
            .registry
            .try_get_model(&schema.app_label, &schema.model_name())
        {
            if Self::is_current(schema, &model) {
                return Ok(model);
            }
        }
        self.regenerate(schema, fields)
    }

    /// Throw away any registered model for the schema and register a fresh one.
    pub fn regenerate(
        &self,
        schema: &ModelSchema,
        fields: &[FieldSchema],
    ) -> Result<Arc<DynamicModel>> {
        let model = Arc::new(self.build(schema, fields)?);
        self.destroy(schema);
        self.register(model.clone());
        Ok(model)
    }

    /// Build the model for a schema without registering it.
    ///
    /// The schema must have been saved: rowids start at 1, so an id below that is a schema that never was.
    pub fn build(&self, schema: &ModelSchema, fields: &[FieldSchema]) -> Result<DynamicModel> {
        if schema.id < 1 {
            return Err(Error::UnsavedSchema(schema.name.clone()));
        }

        let mut builder = ModelBuilder::new(
            schema.app_label.clone(),
            schema.model_name(),
            schema.db_table(),
            schema.verbose_name().to_string(),
            schema.id,
            schema.version,
        );

        for spec in self.config.default_fields.iter() {
            let spec = spec.clone().resolve(self.config)?;
            builder.add_field(&spec)?;
        }

        for field in fields {
            if field.model_id != schema.id {
                return Err(Error::invalid_field(
                    &field.spec.name,
                    format!("belongs to model schema {}, not {}", field.model_id, schema.id),
                ));
            }
            builder.add_column(FieldFactory::new(field).make_field()?)?;
        }

        debug!(
            "Built {}.{} at {}",
            schema.app_label,
            schema.model_name(),
            schema.version
        );
        Ok(builder.build())
    }

    /// Publish a built model, replacing whatever was registered under its name.
    pub fn register(&self, model: Arc<DynamicModel>) {
        self.registry.register_model(model);
    }

    /// Unregister the schema's model, if registered.
    pub fn destroy(&self, schema: &ModelSchema) -> Option<Arc<DynamicModel>> {
        self.registry
            .unregister_model(&schema.app_label, &schema.model_name())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use time::OffsetDateTime;

    use crate::field::{FieldKind, FieldSpec};
    use crate::version::SchemaVersion;

    fn model_schema(version: u64) -> ModelSchema {
        ModelSchema {
            id: 7,
            name: "simple model".into(),
            app_label: "tests".into(),
            version: SchemaVersion::new(version),
            modified: OffsetDateTime::now_utc(),
        }
    }

    fn field_schema() -> FieldSchema {
        FieldSchema {
            id: 1,
            model_id: 7,
            spec: FieldSpec::new("field", FieldKind::Integer),
        }
    }

    #[test]
    fn test_get_model_makes_if_not_exists() {
        let registry = AppRegistry::new();
        let config = Config::default();
        let schema = model_schema(1);
        assert!(!registry.is_registered("tests", &schema.model_name()));
        ModelFactory::new(&registry, &config)
            .get_model(&schema, &[])
            .unwrap();
        assert!(registry.is_registered("tests", &schema.model_name()));
    }

    #[test]
    fn test_model_has_field_with_field_on_schema() {
        let registry = AppRegistry::new();
        let config = Config::default();
        let model = ModelFactory::new(&registry, &config)
            .get_model(&model_schema(1), &[field_schema()])
            .unwrap();
        assert_eq!(
            model.get_field("field").unwrap().get_kind(),
            FieldKind::Integer
        );
    }

    #[test]
    fn test_schema_defines_model_meta() {
        let registry = AppRegistry::new();
        let config = Config::default();
        let schema = model_schema(1);
        let model = ModelFactory::new(&registry, &config)
            .get_model(&schema, &[])
            .unwrap();
        assert_eq!(model.get_model_name(), schema.model_name());
        assert_eq!(model.get_db_table(), schema.db_table());
        assert_eq!(model.get_verbose_name(), schema.name);
    }

    #[test]
    fn test_get_model_reuses_current_and_replaces_stale() {
        let registry = AppRegistry::new();
        let config = Config::default();
        let factory = ModelFactory::new(&registry, &config);
        let first = factory.get_model(&model_schema(1), &[]).unwrap();
        let again = factory.get_model(&model_schema(1), &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let newer = factory
            .get_model(&model_schema(2), &[field_schema()])
            .unwrap();
        assert_eq!(newer.get_version(), SchemaVersion::new(2));
        assert!(!Arc::ptr_eq(&first, &newer));
        assert!(Arc::ptr_eq(
            &registry.get_model("tests", "SimpleModel").unwrap(),
            &newer
        ));
    }

    #[test]
    fn test_destroy_model_unregisters() {
        let registry = AppRegistry::new();
        let config = Config::default();
        let factory = ModelFactory::new(&registry, &config);
        let schema = model_schema(1);
        factory.get_model(&schema, &[]).unwrap();
        assert!(factory.destroy(&schema).is_some());
        assert!(!registry.is_registered("tests", &schema.model_name()));
        assert!(factory.destroy(&schema).is_none());
    }

    #[test]
    fn test_default_fields() {
        let registry = AppRegistry::new();
        let config = Config {
            default_fields: vec![FieldSpec::new("created", FieldKind::DateTime).null(true)],
            ..Default::default()
        };
        let factory = ModelFactory::new(&registry, &config);
        let model = factory.build(&model_schema(1), &[field_schema()]).unwrap();
        let names = model.iter_columns().map(|c| c.get_name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "created", "field"]);

        let clashing = FieldSchema {
            id: 2,
            model_id: 7,
            spec: FieldSpec::new("Created", FieldKind::Text),
        };
        assert!(matches!(
            factory.build(&model_schema(1), &[clashing]),
            Err(Error::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_unsaved_schema() {
        let registry = AppRegistry::new();
        let config = Config::default();
        let schema = ModelSchema {
            id: 0,
            ..model_schema(1)
        };
        assert!(matches!(
            ModelFactory::new(&registry, &config).get_model(&schema, &[]),
            Err(Error::UnsavedSchema(_))
        ));
        assert!(!registry.is_registered("tests", "SimpleModel"));
    }

    #[test]
    fn test_make_field() {
        let field = FieldSchema {
            id: 1,
            model_id: 7,
            spec: FieldSpec::new("name", FieldKind::Char)
                .max_length(255)
                .null(true),
        };
        let column = FieldFactory::new(&field).make_field().unwrap();
        assert_eq!(column.get_kind(), FieldKind::Char);
        assert!(column.is_nullable());
        assert_eq!(column.sql_type(), "varchar(255)");
    }
}
