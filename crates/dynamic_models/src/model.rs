//! Model definitions.
use time::OffsetDateTime;

use crate::errors::{Error, Result};
use crate::naming;
use crate::version::SchemaVersion;

/// A model definition which has been saved to the bookkeeping tables.
///
/// The row only stores the human name; everything else about the table is derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSchema {
    pub id: i64,
    pub name: String,
    pub app_label: String,
    pub version: SchemaVersion,
    pub modified: OffsetDateTime,
}

impl ModelSchema {
    /// The name of the generated model, e.g. `SimpleModel` for `simple model`.
    pub fn model_name(&self) -> String {
        naming::model_class_name(&self.name)
    }

    /// Table name without the app label.
    pub fn table_name(&self) -> String {
        naming::table_or_column_name(&self.name)
    }

    /// The name of the table in the database.
    pub fn db_table(&self) -> String {
        db_table(&self.app_label, &self.name)
    }

    pub fn verbose_name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn db_table(app_label: &str, name: &str) -> String {
    format!("{}_{}", app_label, naming::table_or_column_name(name))
}

/// Check that a model name produces a usable model and table.
pub fn check_model_name(name: &str) -> Result<()> {
    let table = naming::table_or_column_name(name);
    if table.is_empty() || !naming::is_valid_identifier(&table) {
        return Err(Error::InvalidModelName(name.to_string()));
    }
    Ok(())
}
