//! Reading and writing the bookkeeping tables.
//!
//! These functions only touch the rows describing models and fields.  They neither validate nor change any dynamic
//! table; that is the job of [crate::lifecycle], which calls in here.
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::database::{FIELD_SCHEMA_TABLE, MODEL_SCHEMA_TABLE};
use crate::errors::{Error, Result};
use crate::field::{FieldKind, FieldSchema, FieldSpec};
use crate::model::{db_table, ModelSchema};
use crate::naming::quote_ident;
use crate::version::SchemaVersion;

fn conversion_error(
    index: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, e.into())
}

fn model_from_row(r: &rusqlite::Row) -> rusqlite::Result<ModelSchema> {
    let modified: String = r.get(4)?;
    Ok(ModelSchema {
        id: r.get(0)?,
        name: r.get(1)?,
        app_label: r.get(2)?,
        version: r.get(3)?,
        modified: OffsetDateTime::parse(&modified, &Rfc3339).map_err(|e| conversion_error(4, e))?,
    })
}

fn field_from_row(r: &rusqlite::Row) -> rusqlite::Result<FieldSchema> {
    let kind: String = r.get(3)?;
    Ok(FieldSchema {
        id: r.get(0)?,
        model_id: r.get(1)?,
        spec: FieldSpec {
            name: r.get(2)?,
            kind: FieldKind::parse(&kind)
                .ok_or_else(|| conversion_error(3, format!("unknown field kind {}", kind)))?,
            null: r.get(4)?,
            unique: r.get(5)?,
            max_length: r.get(6)?,
        },
    })
}

fn model_select() -> String {
    format!(
        "SELECT id, name, app_label, version, modified FROM {}",
        quote_ident(MODEL_SCHEMA_TABLE)
    )
}

fn field_select() -> String {
    format!(
        r#"SELECT id, model_id, name, kind, "null", "unique", max_length FROM {}"#,
        quote_ident(FIELD_SCHEMA_TABLE)
    )
}

fn now() -> Result<(OffsetDateTime, String)> {
    let now = OffsetDateTime::now_utc();
    let formatted = now.format(&Rfc3339)?;
    Ok((now, formatted))
}

pub(crate) fn insert_model_schema(
    conn: &rusqlite::Connection,
    app_label: &str,
    name: &str,
) -> Result<ModelSchema> {
    let (modified, formatted) = now()?;
    conn.execute(
        &format!(
            "INSERT INTO {}(name, app_label, db_table, version, modified) VALUES(?, ?, ?, ?, ?)",
            quote_ident(MODEL_SCHEMA_TABLE)
        ),
        rusqlite::params![
            name,
            app_label,
            db_table(app_label, name),
            SchemaVersion::INITIAL,
            formatted
        ],
    )?;

    Ok(ModelSchema {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        app_label: app_label.to_string(),
        version: SchemaVersion::INITIAL,
        modified,
    })
}

pub(crate) fn get_model_schema(conn: &rusqlite::Connection, id: i64) -> Result<ModelSchema> {
    conn.prepare_cached(&format!("{} WHERE id = ?", model_select()))?
        .query_row([id], model_from_row)
        .optional()?
        .ok_or(Error::ModelSchemaNotFound(id))
}

pub(crate) fn find_model_schema(
    conn: &rusqlite::Connection,
    app_label: &str,
    name: &str,
) -> Result<Option<ModelSchema>> {
    Ok(conn
        .prepare_cached(&format!("{} WHERE app_label = ? AND name = ?", model_select()))?
        .query_row([app_label, name], model_from_row)
        .optional()?)
}

pub(crate) fn list_model_schemas(
    conn: &rusqlite::Connection,
    app_label: &str,
) -> Result<Vec<ModelSchema>> {
    Ok(conn
        .prepare_cached(&format!("{} WHERE app_label = ? ORDER BY id", model_select()))?
        .query_map([app_label], model_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Whether a model schema other than `except` uses `db_table`.
pub(crate) fn db_table_in_use(
    conn: &rusqlite::Connection,
    db_table: &str,
    except: Option<i64>,
) -> Result<bool> {
    Ok(conn
        .prepare_cached(&format!(
            "SELECT 1 FROM {} WHERE db_table = ? AND id IS NOT ?",
            quote_ident(MODEL_SCHEMA_TABLE)
        ))?
        .exists(rusqlite::params![db_table, except])?)
}

pub(crate) fn rename_model_schema(conn: &rusqlite::Connection, id: i64, name: &str) -> Result<()> {
    let schema = get_model_schema(conn, id)?;
    conn.execute(
        &format!(
            "UPDATE {} SET name = ?, db_table = ? WHERE id = ?",
            quote_ident(MODEL_SCHEMA_TABLE)
        ),
        rusqlite::params![name, db_table(&schema.app_label, name), id],
    )?;
    Ok(())
}

/// Record that a model schema changed: bump its version and modified time.
pub(crate) fn touch_model_schema(conn: &rusqlite::Connection, id: i64) -> Result<ModelSchema> {
    let schema = get_model_schema(conn, id)?;
    let version = schema.version.increment();
    let (modified, formatted) = now()?;
    conn.execute(
        &format!(
            "UPDATE {} SET version = ?, modified = ? WHERE id = ?",
            quote_ident(MODEL_SCHEMA_TABLE)
        ),
        rusqlite::params![version, formatted, id],
    )?;
    Ok(ModelSchema {
        version,
        modified,
        ..schema
    })
}

/// Delete a model schema.  Its field schemas go with it.
pub(crate) fn delete_model_schema(conn: &rusqlite::Connection, id: i64) -> Result<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE model_id = ?", quote_ident(FIELD_SCHEMA_TABLE)),
        [id],
    )?;
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?", quote_ident(MODEL_SCHEMA_TABLE)),
        [id],
    )?;
    if deleted == 0 {
        return Err(Error::ModelSchemaNotFound(id));
    }
    Ok(())
}

pub(crate) fn insert_field_schema(
    conn: &rusqlite::Connection,
    model_id: i64,
    spec: &FieldSpec,
) -> Result<FieldSchema> {
    conn.execute(
        &format!(
            r#"INSERT INTO {}(model_id, name, column_name, kind, "null", "unique", max_length)
            VALUES(?, ?, ?, ?, ?, ?, ?)"#,
            quote_ident(FIELD_SCHEMA_TABLE)
        ),
        rusqlite::params![
            model_id,
            spec.name,
            spec.column_name(),
            spec.kind.as_str(),
            spec.null,
            spec.unique,
            spec.max_length
        ],
    )?;

    Ok(FieldSchema {
        id: conn.last_insert_rowid(),
        model_id,
        spec: spec.clone(),
    })
}

pub(crate) fn get_field_schema(conn: &rusqlite::Connection, id: i64) -> Result<FieldSchema> {
    conn.prepare_cached(&format!("{} WHERE id = ?", field_select()))?
        .query_row([id], field_from_row)
        .optional()?
        .ok_or(Error::FieldSchemaNotFound(id))
}

/// The fields of a model, in the order they were added.
pub(crate) fn list_field_schemas(
    conn: &rusqlite::Connection,
    model_id: i64,
) -> Result<Vec<FieldSchema>> {
    Ok(conn
        .prepare_cached(&format!("{} WHERE model_id = ? ORDER BY id", field_select()))?
        .query_map([model_id], field_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn update_field_schema(
    conn: &rusqlite::Connection,
    id: i64,
    spec: &FieldSpec,
) -> Result<()> {
    let updated = conn.execute(
        &format!(
            r#"UPDATE {} SET name = ?, column_name = ?, kind = ?, "null" = ?, "unique" = ?, max_length = ?
            WHERE id = ?"#,
            quote_ident(FIELD_SCHEMA_TABLE)
        ),
        rusqlite::params![
            spec.name,
            spec.column_name(),
            spec.kind.as_str(),
            spec.null,
            spec.unique,
            spec.max_length,
            id
        ],
    )?;
    if updated == 0 {
        return Err(Error::FieldSchemaNotFound(id));
    }
    Ok(())
}

pub(crate) fn delete_field_schema(conn: &rusqlite::Connection, id: i64) -> Result<()> {
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?", quote_ident(FIELD_SCHEMA_TABLE)),
        [id],
    )?;
    if deleted == 0 {
        return Err(Error::FieldSchemaNotFound(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::database::Database;

    fn db() -> Database {
        Database::with_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_model_schema_rows() {
        let db = db();
        let conn = db.connection();
        let created = insert_model_schema(conn, "tests", "simple model").unwrap();
        assert_eq!(created.version, SchemaVersion::INITIAL);

        let loaded = get_model_schema(conn, created.id).unwrap();
        assert_eq!(loaded.name, "simple model");
        assert_eq!(
            find_model_schema(conn, "tests", "simple model").unwrap().unwrap().id,
            created.id
        );
        assert!(find_model_schema(conn, "other", "simple model").unwrap().is_none());
        assert!(db_table_in_use(conn, "tests_simple_model", None).unwrap());
        assert!(!db_table_in_use(conn, "tests_simple_model", Some(created.id)).unwrap());

        let touched = touch_model_schema(conn, created.id).unwrap();
        assert_eq!(touched.version, SchemaVersion::new(2));
        assert_eq!(get_model_schema(conn, created.id).unwrap().version, SchemaVersion::new(2));

        rename_model_schema(conn, created.id, "renamed").unwrap();
        assert!(db_table_in_use(conn, "tests_renamed", None).unwrap());

        delete_model_schema(conn, created.id).unwrap();
        assert!(matches!(
            get_model_schema(conn, created.id),
            Err(Error::ModelSchemaNotFound(_))
        ));
    }

    #[test]
    fn test_field_schema_rows() {
        let db = db();
        let conn = db.connection();
        let model = insert_model_schema(conn, "tests", "m").unwrap();
        let a = insert_field_schema(
            conn,
            model.id,
            &FieldSpec::new("a", FieldKind::Char).max_length(3),
        )
        .unwrap();
        let b = insert_field_schema(
            conn,
            model.id,
            &FieldSpec::new("b", FieldKind::DateTime).null(true),
        )
        .unwrap();

        assert_eq!(list_field_schemas(conn, model.id).unwrap(), vec![a.clone(), b.clone()]);

        let renamed = FieldSpec::new("c", FieldKind::DateTime).null(true);
        update_field_schema(conn, b.id, &renamed).unwrap();
        assert_eq!(get_field_schema(conn, b.id).unwrap().spec, renamed);

        // Same column twice is refused by the table.
        assert!(insert_field_schema(conn, model.id, &FieldSpec::new("A", FieldKind::Text)).is_err());

        delete_field_schema(conn, a.id).unwrap();
        assert!(matches!(
            delete_field_schema(conn, a.id),
            Err(Error::FieldSchemaNotFound(_))
        ));

        delete_model_schema(conn, model.id).unwrap();
        assert!(list_field_schemas(conn, model.id).unwrap().is_empty());
    }
}
