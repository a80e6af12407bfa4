//! Reading and writing rows of dynamic tables.
//!
//! Every operation first checks that the model it was handed is still current.  A model is a snapshot of a definition,
//! and callers may hold one across a change; using it afterwards would read or write a table which no longer has that
//! shape, so such a model fails with [Error::OutdatedModel] and the caller should fetch a fresh one.
use log::*;

use crate::cache::ModelCache;
use crate::descriptor::{DynamicModel, PRIMARY_KEY};
use crate::errors::{Error, Result};
use crate::naming::quote_ident;
use crate::row_value::RowValue;
use crate::store;

const INSERT_TEMPLATE: &str = r#"
INSERT INTO {{ table }}
{%- if has_columns %}(
    {{ columns | join(sep=", ") }}
) VALUES (
    {%- for p in params -%}
    {{ p }}{% if not loop.last %}, {% endif -%}
    {%- endfor -%}
)
{%- else %} DEFAULT VALUES{% endif %}
"#;

const UPDATE_TEMPLATE: &str = r#"
UPDATE {{ table }} SET
{%- for c in assignments %} {{ c }}{% if not loop.last %},{% endif %}{% endfor %}
WHERE {{ pk }} = :{{ pk_param }}
"#;

const LOAD_TEMPLATE: &str = r#"
SELECT {{ columns | join(sep=", ") }}
FROM {{ table }}
{%- if by_id %} WHERE {{ pk }} = ?{% endif %}
ORDER BY {{ pk }}
"#;

/// Fail with [Error::OutdatedModel] unless `model` was built from the current version of its schema.
///
/// The cache is consulted first; when it has nothing for this schema the bookkeeping tables are, and the cache is
/// refilled from them.
pub fn check_current(
    conn: &rusqlite::Connection,
    cache: &ModelCache,
    model: &DynamicModel,
) -> Result<()> {
    let outdated = || Error::OutdatedModel(model.get_model_name().to_string());

    if let Some(marker) = cache.get_last_modified(model.get_model_name()) {
        if marker.schema_id == model.get_schema_id() {
            return if marker.version == model.get_version() {
                Ok(())
            } else {
                Err(outdated())
            };
        }
    }

    let schema = match store::get_model_schema(conn, model.get_schema_id()) {
        Ok(s) => s,
        Err(Error::ModelSchemaNotFound(_)) => return Err(outdated()),
        Err(e) => return Err(e),
    };
    cache.update_last_modified(&schema);

    if schema.version != model.get_version() || schema.model_name() != model.get_model_name() {
        debug!(
            "{} at {} is outdated, schema is at {}",
            model.get_model_name(),
            model.get_version(),
            schema.version
        );
        return Err(outdated());
    }
    Ok(())
}

fn build_insert(model: &DynamicModel, row: &RowValue) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("table", &quote_ident(model.get_db_table()));
    context.insert("has_columns", &!row.is_empty());
    context.insert(
        "columns",
        &row.column_names().map(quote_ident).collect::<Vec<_>>(),
    );
    context.insert(
        "params",
        &row.column_names()
            .map(|c| format!(":{}", c))
            .collect::<Vec<_>>(),
    );
    let stmt = tera::Tera::one_off(INSERT_TEMPLATE, &context, false)?;
    trace!("Insert statement for {}: {}", model.get_db_table(), stmt);
    Ok(stmt)
}

fn build_update(model: &DynamicModel, row: &RowValue) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("table", &quote_ident(model.get_db_table()));
    context.insert("pk", &quote_ident(PRIMARY_KEY));
    // Not a column name, so it can't collide with one.
    context.insert("pk_param", "__pk");
    context.insert(
        "assignments",
        &row.column_names()
            .map(|c| format!("{} = :{}", quote_ident(c), c))
            .collect::<Vec<_>>(),
    );
    let stmt = tera::Tera::one_off(UPDATE_TEMPLATE, &context, false)?;
    trace!("Update statement for {}: {}", model.get_db_table(), stmt);
    Ok(stmt)
}

fn build_load(model: &DynamicModel, by_id: bool) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("table", &quote_ident(model.get_db_table()));
    context.insert("pk", &quote_ident(PRIMARY_KEY));
    context.insert("by_id", &by_id);
    context.insert(
        "columns",
        &model
            .iter_columns()
            .map(|c| quote_ident(c.get_name()))
            .collect::<Vec<_>>(),
    );
    Ok(tera::Tera::one_off(LOAD_TEMPLATE, &context, false)?)
}

/// Insert a row, returning its id.
///
/// The value must serialize to an object whose keys are data columns of the model.  Missing keys are NULL, and an
/// `id` key is ignored since ids are assigned by the database.
pub fn insert(
    conn: &rusqlite::Connection,
    cache: &ModelCache,
    model: &DynamicModel,
    value: &impl serde::Serialize,
) -> Result<i64> {
    check_current(conn, cache, model)?;
    let row = RowValue::new(model, value)?;
    let mut statement = conn.prepare_cached(&build_insert(model, &row)?)?;
    row.bind_params(&mut statement)?;
    statement.raw_execute()?;
    Ok(conn.last_insert_rowid())
}

/// Update the columns present in `value` of the row with the given id.  Returns whether the row exists.
pub fn update(
    conn: &rusqlite::Connection,
    cache: &ModelCache,
    model: &DynamicModel,
    id: i64,
    value: &impl serde::Serialize,
) -> Result<bool> {
    check_current(conn, cache, model)?;
    let row = RowValue::new_partial(model, value)?;
    if row.is_empty() {
        return Ok(conn
            .prepare_cached(&format!(
                "SELECT 1 FROM {} WHERE {} = ?",
                quote_ident(model.get_db_table()),
                quote_ident(PRIMARY_KEY)
            ))?
            .exists([id])?);
    }

    let mut statement = conn.prepare_cached(&build_update(model, &row)?)?;
    row.bind_params(&mut statement)?;
    let pk_index = statement.parameter_index(":__pk")?.ok_or_else(|| {
        Error::invalid_value(PRIMARY_KEY, "update statement has no parameter for the id")
    })?;
    statement.raw_bind_parameter(pk_index, id)?;
    Ok(statement.raw_execute()? > 0)
}

pub fn get<T: serde::de::DeserializeOwned>(
    conn: &rusqlite::Connection,
    cache: &ModelCache,
    model: &DynamicModel,
    id: i64,
) -> Result<Option<T>> {
    check_current(conn, cache, model)?;
    let mut statement = conn.prepare_cached(&build_load(model, true)?)?;
    let mut rows = statement.query([id])?;
    match rows.next()? {
        Some(r) => Ok(Some(RowValue::from_rusqlite_row(model, r)?.deserialize()?)),
        None => Ok(None),
    }
}

/// Load every row in id order, calling the callback with each.
///
/// This function can fail in the middle, but will always pass valid objects to your callback.  So e.g. if you see 500
/// and then a failure, there might have been 2000.  An error from the callback stops the load and is returned as
/// [Error::Callback].
pub fn load<T: serde::de::DeserializeOwned>(
    conn: &rusqlite::Connection,
    cache: &ModelCache,
    model: &DynamicModel,
    mut callback: impl FnMut(T) -> anyhow::Result<()>,
) -> Result<()> {
    check_current(conn, cache, model)?;
    let mut statement = conn.prepare_cached(&build_load(model, false)?)?;
    let mut rows = statement.query([])?;
    while let Some(r) = rows.next()? {
        let rv = RowValue::from_rusqlite_row(model, r)?;
        callback(rv.deserialize()?)?;
    }
    Ok(())
}

/// Delete a row.  Returns whether there was one.
pub fn delete(
    conn: &rusqlite::Connection,
    cache: &ModelCache,
    model: &DynamicModel,
    id: i64,
) -> Result<bool> {
    check_current(conn, cache, model)?;
    let deleted = conn
        .prepare_cached(&format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(model.get_db_table()),
            quote_ident(PRIMARY_KEY)
        ))?
        .execute([id])?;
    Ok(deleted > 0)
}

pub fn count(conn: &rusqlite::Connection, cache: &ModelCache, model: &DynamicModel) -> Result<u64> {
    check_current(conn, cache, model)?;
    let count: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {}", quote_ident(model.get_db_table())),
        [],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}
