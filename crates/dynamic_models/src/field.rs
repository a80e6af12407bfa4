//! Field definitions.
//!
//! A [FieldSpec] is what callers hand us to describe a field; a [FieldSchema] is a spec which has been saved to the
//! bookkeeping tables and so has ids.  Validation lives here so that the store and the lifecycle hooks agree on what
//! a legal field is.
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::naming;

/// Kinds of data a dynamic field may hold.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Short text, limited to `max_length` characters.
    Char,
    /// Long text.
    Text,
    /// 64-bit signed integer.
    #[serde(rename = "int")]
    Integer,
    Float,
    #[serde(rename = "bool")]
    Boolean,
    /// A UTC timestamp, stored as RFC 3339 text.
    #[serde(rename = "date")]
    DateTime,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Char => "char",
            FieldKind::Text => "text",
            FieldKind::Integer => "int",
            FieldKind::Float => "float",
            FieldKind::Boolean => "bool",
            FieldKind::DateTime => "date",
        }
    }

    pub fn parse(kind: &str) -> Option<FieldKind> {
        Some(match kind {
            "char" => FieldKind::Char,
            "text" => FieldKind::Text,
            "int" => FieldKind::Integer,
            "float" => FieldKind::Float,
            "bool" => FieldKind::Boolean,
            "date" => FieldKind::DateTime,
            _ => return None,
        })
    }

    /// Human readable description.
    pub fn describe(&self) -> &'static str {
        match self {
            FieldKind::Char => "short text",
            FieldKind::Text => "long text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::DateTime => "date",
        }
    }

    /// The declared sqlite type of a column of this kind.
    pub fn sql_type(&self, max_length: Option<u32>) -> String {
        match self {
            FieldKind::Char => format!("varchar({})", max_length.unwrap_or_default()),
            FieldKind::Text => "text".into(),
            FieldKind::Integer => "integer".into(),
            FieldKind::Float => "real".into(),
            FieldKind::Boolean => "bool".into(),
            FieldKind::DateTime => "datetime".into(),
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user-facing description of a field.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub null: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub max_length: Option<u32>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            kind,
            null: false,
            unique: false,
            max_length: None,
        }
    }

    #[must_use]
    pub fn null(mut self, null: bool) -> FieldSpec {
        self.null = null;
        self
    }

    #[must_use]
    pub fn unique(mut self, unique: bool) -> FieldSpec {
        self.unique = unique;
        self
    }

    #[must_use]
    pub fn max_length(mut self, max_length: u32) -> FieldSpec {
        self.max_length = Some(max_length);
        self
    }

    /// Name of the column this field is stored in.
    pub fn column_name(&self) -> String {
        naming::table_or_column_name(&self.name)
    }

    /// Fill in settings-dependent values and validate.
    ///
    /// `char` fields without a max length get the configured default.
    pub fn resolve(mut self, config: &Config) -> Result<FieldSpec> {
        if self.kind == FieldKind::Char && self.max_length.is_none() {
            self.max_length = Some(config.default_charfield_max_length);
        }
        self.check_name()?;
        self.check_max_length()?;
        Ok(self)
    }

    pub fn check_name(&self) -> Result<()> {
        let column = self.column_name();
        if column == "id" || !naming::is_valid_identifier(&column) {
            return Err(Error::InvalidFieldName(self.name.clone()));
        }
        Ok(())
    }

    /// Max length goes with `char` fields and only `char` fields.
    pub fn check_max_length(&self) -> Result<()> {
        match (self.kind, self.max_length) {
            (FieldKind::Char, None) | (FieldKind::Char, Some(0)) => Err(Error::invalid_field(
                &self.name,
                "max length must be set for char fields",
            )),
            (FieldKind::Char, Some(_)) | (_, None) => Ok(()),
            (_, Some(_)) => Err(Error::invalid_field(
                &self.name,
                "only char fields may set the max length",
            )),
        }
    }

    /// Check that `self` may be changed to `new`.
    ///
    /// The kind is fixed once a field exists, and a nullable field may not become NOT NULL since that would need a
    /// data migration for the rows already holding NULL.
    pub fn check_change(&self, new: &FieldSpec) -> Result<()> {
        if self.kind != new.kind {
            return Err(Error::invalid_field(
                &self.name,
                format!("the kind cannot change from {} to {}", self.kind, new.kind),
            ));
        }
        if self.null && !new.null {
            return Err(Error::NullFieldChanged {
                field: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// A field which has been saved to the bookkeeping tables.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    pub id: i64,
    pub model_id: i64,
    pub spec: FieldSpec,
}

impl FieldSchema {
    pub fn column_name(&self) -> String {
        self.spec.column_name()
    }
}
