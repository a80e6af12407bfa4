//! Descriptors of dynamic models.
//!
//! A [DynamicModel] is the runtime equivalent of a statically declared table: it knows its name, its table, and the
//! ordered columns of that table.  Descriptors are built by the [crate::factory] from the saved schemas, shared behind
//! `Arc`s, and never mutated; a schema change produces a new descriptor with a higher version.
//!
//! Every dynamic table has an integer primary key column named `id`.  All other columns are data columns.
use time::OffsetDateTime;

use crate::errors::{Error, Result};
use crate::field::{FieldKind, FieldSpec};
use crate::naming::quote_ident;
use crate::version::SchemaVersion;

/// Name of the implicit primary key column.
pub const PRIMARY_KEY: &str = "id";

/// A column in a dynamic table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDescriptor {
    name: String,
    kind: FieldKind,
    primary_key: bool,
    nullable: bool,
    unique: bool,
    max_length: Option<u32>,
}

impl ColumnDescriptor {
    pub fn new(
        name: String,
        kind: FieldKind,
        primary_key: bool,
        nullable: bool,
        unique: bool,
        max_length: Option<u32>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidFieldName(name));
        }

        if primary_key && nullable {
            return Err(Error::invalid_field(
                name,
                "primary key columns may not be nullable",
            ));
        }

        Ok(Self {
            name,
            kind,
            primary_key,
            nullable,
            unique,
            max_length,
        })
    }

    /// The implicit `id` column.
    pub fn primary_key() -> Self {
        Self {
            name: PRIMARY_KEY.into(),
            kind: FieldKind::Integer,
            primary_key: true,
            nullable: false,
            unique: false,
            max_length: None,
        }
    }

    /// The column for a field spec.  The spec should already be resolved.
    pub fn from_spec(spec: &FieldSpec) -> Result<Self> {
        Self::new(
            spec.column_name(),
            spec.kind,
            false,
            spec.null,
            spec.unique,
            spec.max_length,
        )
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn get_max_length(&self) -> Option<u32> {
        self.max_length
    }

    pub fn sql_type(&self) -> String {
        self.kind.sql_type(self.max_length)
    }

    /// The column definition as it appears in `CREATE TABLE` and `ALTER TABLE ADD COLUMN`.
    pub fn definition_sql(&self) -> String {
        if self.primary_key {
            return format!(
                "{} {} NOT NULL PRIMARY KEY AUTOINCREMENT",
                quote_ident(&self.name),
                self.sql_type()
            );
        }

        let mut def = format!(
            "{} {} {}",
            quote_ident(&self.name),
            self.sql_type(),
            if self.nullable { "NULL" } else { "NOT NULL" }
        );
        if self.unique {
            def.push_str(" UNIQUE");
        }
        def
    }

    /// Copy of this column under another name.
    #[must_use]
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// A dynamically declared model.
#[derive(Clone, Debug)]
pub struct DynamicModel {
    app_label: String,
    model_name: String,
    db_table: String,
    verbose_name: String,
    schema_id: i64,
    version: SchemaVersion,
    declared_at: OffsetDateTime,
    columns: Vec<ColumnDescriptor>,
}

impl DynamicModel {
    pub fn get_app_label(&self) -> &str {
        &self.app_label
    }

    pub fn get_model_name(&self) -> &str {
        &self.model_name
    }

    pub fn get_db_table(&self) -> &str {
        &self.db_table
    }

    pub fn get_verbose_name(&self) -> &str {
        &self.verbose_name
    }

    /// Id of the model schema this model was built from.
    pub fn get_schema_id(&self) -> i64 {
        self.schema_id
    }

    /// Version of the model schema this model was built from.
    pub fn get_version(&self) -> SchemaVersion {
        self.version
    }

    pub fn get_declared_at(&self) -> OffsetDateTime {
        self.declared_at
    }

    /// Look up a column by name.
    pub fn get_field(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.get_name() == name)
    }

    pub fn iter_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter()
    }

    /// All columns except the primary key.
    pub fn iter_data_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.is_primary_key())
    }

    /// Whether two models describe the same table shape, ignoring names and versions.
    pub fn same_columns(&self, other: &DynamicModel) -> bool {
        self.columns == other.columns
    }
}

/// A helper to build models.
pub struct ModelBuilder {
    app_label: String,
    model_name: String,
    db_table: String,
    verbose_name: String,
    schema_id: i64,
    version: SchemaVersion,
    columns: Vec<ColumnDescriptor>,
}

impl ModelBuilder {
    /// Start a model.  The primary key column is added for you.
    pub fn new(
        app_label: String,
        model_name: String,
        db_table: String,
        verbose_name: String,
        schema_id: i64,
        version: SchemaVersion,
    ) -> Self {
        Self {
            app_label,
            model_name,
            db_table,
            verbose_name,
            schema_id,
            version,
            columns: vec![ColumnDescriptor::primary_key()],
        }
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.columns.iter().any(|x| x.get_name() == name) {
            return Err(Error::DuplicateField {
                model: self.model_name.clone(),
                column: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn add_column(&mut self, column: ColumnDescriptor) -> Result<()> {
        self.check_name(column.get_name())?;
        if column.is_primary_key() {
            return Err(Error::invalid_field(
                column.get_name(),
                "dynamic models only have the implicit primary key",
            ));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn add_field(&mut self, spec: &FieldSpec) -> Result<()> {
        self.add_column(ColumnDescriptor::from_spec(spec)?)
    }

    pub fn build(self) -> DynamicModel {
        DynamicModel {
            app_label: self.app_label,
            model_name: self.model_name,
            db_table: self.db_table,
            verbose_name: self.verbose_name,
            schema_id: self.schema_id,
            version: self.version,
            declared_at: OffsetDateTime::now_utc(),
            columns: self.columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ModelBuilder {
        ModelBuilder::new(
            "tests".into(),
            "Thing".into(),
            "tests_thing".into(),
            "thing".into(),
            1,
            SchemaVersion::INITIAL,
        )
    }

    #[test]
    fn test_build() {
        let mut b = builder();
        b.add_field(&FieldSpec::new("count", FieldKind::Integer).null(true))
            .unwrap();
        b.add_field(&FieldSpec::new("title", FieldKind::Char).max_length(10).unique(true))
            .unwrap();
        let model = b.build();

        let names = model.iter_columns().map(|c| c.get_name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "count", "title"]);
        assert_eq!(model.iter_data_columns().count(), 2);
        assert!(model.get_field("id").unwrap().is_primary_key());
        assert_eq!(
            model.get_field("title").unwrap().definition_sql(),
            r#""title" varchar(10) NOT NULL UNIQUE"#
        );
        assert_eq!(
            model.get_field("count").unwrap().definition_sql(),
            r#""count" integer NULL"#
        );
        assert_eq!(
            model.get_field("id").unwrap().definition_sql(),
            r#""id" integer NOT NULL PRIMARY KEY AUTOINCREMENT"#
        );
    }

    #[test]
    fn test_duplicate_columns() {
        let mut b = builder();
        b.add_field(&FieldSpec::new("count", FieldKind::Integer))
            .unwrap();
        let err = b
            .add_field(&FieldSpec::new("Count", FieldKind::Float))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateField { .. }), "{:?}", err);
    }

    #[test]
    fn test_no_extra_primary_keys() {
        let mut b = builder();
        let pk = ColumnDescriptor::new("other".into(), FieldKind::Integer, true, false, false, None)
            .unwrap();
        assert!(b.add_column(pk).is_err());
        assert!(
            ColumnDescriptor::new("x".into(), FieldKind::Integer, true, true, false, None).is_err()
        );
    }
}
