//! An opaque value of a row, used for storing and loading data.
//!
//! Get one with [RowValue::new] (every data column) or [RowValue::new_partial] (only the columns the value has), which
//! take a model and a serde-serializable value, or with [RowValue::from_rusqlite_row] when loading.
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::descriptor::{ColumnDescriptor, DynamicModel, PRIMARY_KEY};
use crate::errors::{Error, Result};
use crate::field::FieldKind;

#[derive(Debug, Clone, PartialEq)]
enum ColumnValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// Normalized to UTC and formatted as RFC 3339.
    DateTime(String),
}

impl rusqlite::ToSql for ColumnValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ColumnValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            ColumnValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            ColumnValue::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            ColumnValue::Text(s) | ColumnValue::DateTime(s) => {
                ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))
            }
            ColumnValue::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(*b as i64)),
        })
    }
}

/// Rows are built and thrown away for every record operation, so instead of a hashmap we use a `SmallVec` map.  These
/// are the entries in that map.
#[derive(Debug)]
struct RowMapEntry {
    name: String,
    value: ColumnValue,
}

#[derive(Debug, Default)]
struct RowMap {
    entries: SmallVec<[RowMapEntry; 32]>,
}

#[derive(Debug)]
pub(crate) struct RowValue {
    map: RowMap,
}

fn normalize_datetime(column: &str, text: &str) -> Result<String> {
    let parsed = OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|e| Error::invalid_value(column, format!("not an RFC 3339 timestamp: {}", e)))?;
    Ok(parsed.to_offset(UtcOffset::UTC).format(&Rfc3339)?)
}

/// Convert one JSON value to the value stored in `column`.
fn json_to_column(column: &ColumnDescriptor, value: &Value) -> Result<ColumnValue> {
    let name = column.get_name();
    if value.is_null() {
        if !column.is_nullable() {
            return Err(Error::invalid_value(name, "got null but the column isn't nullable"));
        }
        return Ok(ColumnValue::Null);
    }

    let expected = || Error::invalid_value(name, format!("should be {}", column.get_kind().describe()));

    Ok(match column.get_kind() {
        FieldKind::Char => {
            let s = value.as_str().ok_or_else(expected)?;
            if let Some(max) = column.get_max_length() {
                let len = s.chars().count();
                if len > max as usize {
                    return Err(Error::invalid_value(
                        name,
                        format!("{} characters is longer than the max length of {}", len, max),
                    ));
                }
            }
            ColumnValue::Text(s.to_string())
        }
        FieldKind::Text => ColumnValue::Text(value.as_str().ok_or_else(expected)?.to_string()),
        FieldKind::Integer => ColumnValue::Integer(value.as_i64().ok_or_else(expected)?),
        FieldKind::Float => ColumnValue::Float(value.as_f64().ok_or_else(expected)?),
        FieldKind::Boolean => ColumnValue::Bool(value.as_bool().ok_or_else(expected)?),
        FieldKind::DateTime => {
            ColumnValue::DateTime(normalize_datetime(name, value.as_str().ok_or_else(expected)?)?)
        }
    })
}

/// Convert what sqlite handed back for `column`.
///
/// No length or nullability checks here: rows written before a field changed must still load.
fn column_from_sql(column: &ColumnDescriptor, value: ValueRef) -> Result<ColumnValue> {
    let unexpected = |what: &str| {
        Error::invalid_value(
            column.get_name(),
            format!("stored {} can't be read as {}", what, column.get_kind().describe()),
        )
    };

    Ok(match (column.get_kind(), value) {
        (_, ValueRef::Null) => ColumnValue::Null,
        (FieldKind::Integer, ValueRef::Integer(i)) => ColumnValue::Integer(i),
        (FieldKind::Float, ValueRef::Integer(i)) => ColumnValue::Float(i as f64),
        (FieldKind::Float, ValueRef::Real(f)) => ColumnValue::Float(f),
        (FieldKind::Boolean, ValueRef::Integer(i)) => ColumnValue::Bool(i != 0),
        (FieldKind::Char | FieldKind::Text, ValueRef::Text(t)) => {
            ColumnValue::Text(String::from_utf8_lossy(t).into_owned())
        }
        (FieldKind::DateTime, ValueRef::Text(t)) => {
            ColumnValue::DateTime(String::from_utf8_lossy(t).into_owned())
        }
        (_, ValueRef::Integer(_)) => return Err(unexpected("integer")),
        (_, ValueRef::Real(_)) => return Err(unexpected("real")),
        (_, ValueRef::Text(_)) => return Err(unexpected("text")),
        (_, ValueRef::Blob(_)) => return Err(unexpected("blob")),
    })
}

impl RowValue {
    /// Make a row with every data column of the model.  Columns missing from the value are NULL.
    pub fn new(model: &DynamicModel, value: &impl serde::Serialize) -> Result<RowValue> {
        Self::from_serializable(model, value, false)
    }

    /// Make a row with only the data columns present in the value, for updates.
    pub fn new_partial(model: &DynamicModel, value: &impl serde::Serialize) -> Result<RowValue> {
        Self::from_serializable(model, value, true)
    }

    fn from_serializable(
        model: &DynamicModel,
        value: &impl serde::Serialize,
        partial: bool,
    ) -> Result<RowValue> {
        // We go through serde_json because it is a convenient way to get something we can walk by column name.
        let json = serde_json::to_value(value)?;
        let object = json.as_object().ok_or_else(|| {
            Error::invalid_value(model.get_model_name(), "a row must serialize to an object")
        })?;

        if let Some(unknown) = object
            .keys()
            .find(|k| k.as_str() != PRIMARY_KEY && model.get_field(k).is_none())
        {
            return Err(Error::invalid_value(unknown.as_str(), "no such column"));
        }

        let mut map: RowMap = Default::default();
        for column in model.iter_data_columns() {
            let value = match object.get(column.get_name()) {
                Some(v) => json_to_column(column, v)?,
                None if partial => continue,
                None => json_to_column(column, &Value::Null)?,
            };

            map.entries.push(RowMapEntry {
                name: column.get_name().to_string(),
                value,
            });
        }

        Ok(RowValue { map })
    }

    /// Read a row which was selected with all the model's columns, in model order.
    pub fn from_rusqlite_row(model: &DynamicModel, row: &rusqlite::Row) -> Result<RowValue> {
        let mut map: RowMap = Default::default();
        for (index, column) in model.iter_columns().enumerate() {
            map.entries.push(RowMapEntry {
                name: column.get_name().to_string(),
                value: column_from_sql(column, row.get_ref(index)?)?,
            });
        }

        Ok(RowValue { map })
    }

    pub fn is_empty(&self) -> bool {
        self.map.entries.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.map.entries.iter().map(|e| e.name.as_str())
    }

    /// Bind this row to a statement which has a `:name` parameter for each column of the row.
    pub fn bind_params(&self, statement: &mut rusqlite::Statement) -> Result<()> {
        for entry in self.map.entries.iter() {
            let param = format!(":{}", entry.name);
            let index = statement.parameter_index(&param)?.ok_or_else(|| {
                Error::invalid_value(entry.name.as_str(), "statement has no parameter for column")
            })?;
            statement.raw_bind_parameter(index, &entry.value)?;
        }
        Ok(())
    }

    fn into_json(self) -> Value {
        let mut object = Map::new();
        for entry in self.map.entries {
            let value = match entry.value {
                ColumnValue::Null => Value::Null,
                ColumnValue::Integer(i) => Value::from(i),
                ColumnValue::Float(f) => serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                ColumnValue::Text(s) | ColumnValue::DateTime(s) => Value::String(s),
                ColumnValue::Bool(b) => Value::Bool(b),
            };
            object.insert(entry.name, value);
        }
        Value::Object(object)
    }

    pub fn deserialize<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_json())?)
    }
}
