//! Reading the live shape of tables back out of sqlite.
//!
//! The synchronizer compares what a [DynamicModel] says a table should look like with what these functions report,
//! so everything here works from sqlite's own catalog (`sqlite_master` and the table/index pragmas) rather than from
//! the bookkeeping tables.
use std::collections::HashSet;

use rusqlite::OptionalExtension;

use crate::descriptor::{ColumnDescriptor, DynamicModel};
use crate::errors::Result;
use crate::naming::quote_ident;

/// A column as sqlite reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    /// The declared type, as written in the DDL.
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// Whether a single-column unique constraint covers the column.
    pub unique: bool,
}

impl LiveColumn {
    /// Whether this column is what `column` describes.
    pub fn matches(&self, column: &ColumnDescriptor) -> bool {
        if self.primary_key || column.is_primary_key() {
            return self.primary_key == column.is_primary_key()
                && self.sql_type.eq_ignore_ascii_case(&column.sql_type());
        }

        self.sql_type.eq_ignore_ascii_case(&column.sql_type())
            && self.not_null != column.is_nullable()
            && self.unique == column.is_unique()
    }
}

pub fn table_exists(conn: &rusqlite::Connection, table: &str) -> Result<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")?
        .exists([table])?)
}

/// Names of the columns covered by a single-column unique constraint or unique index.
pub fn unique_columns(conn: &rusqlite::Connection, table: &str) -> Result<HashSet<String>> {
    let mut ret = HashSet::new();

    let mut indexes = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
    let unique_indexes = indexes
        .query_map([], |r| {
            Ok((
                r.get::<_, String>("name")?,
                r.get::<_, bool>("unique")?,
                r.get::<_, String>("origin")?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (index, unique, origin) in unique_indexes {
        if !unique || origin == "pk" {
            continue;
        }

        let mut info = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&index)))?;
        let columns = info
            .query_map([], |r| r.get::<_, Option<String>>("name"))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if let [Some(name)] = &columns[..] {
            ret.insert(name.clone());
        }
    }

    Ok(ret)
}

/// The columns of a table, in table order.  Empty if the table doesn't exist.
pub fn table_columns(conn: &rusqlite::Connection, table: &str) -> Result<Vec<LiveColumn>> {
    let unique = unique_columns(conn, table)?;
    let mut statement = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = statement
        .query_map([], |r| {
            Ok(LiveColumn {
                name: r.get("name")?,
                sql_type: r.get("type")?,
                not_null: r.get("notnull")?,
                primary_key: r.get::<_, i64>("pk")? != 0,
                unique: false,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(columns
        .into_iter()
        .map(|mut c| {
            c.unique = unique.contains(&c.name);
            c
        })
        .collect())
}

pub fn table_has_column(conn: &rusqlite::Connection, table: &str, column: &str) -> Result<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c.name == column))
}

/// Whether a column accepts NULL, or `None` if there is no such column.
pub fn column_allows_null(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
) -> Result<Option<bool>> {
    Ok(table_columns(conn, table)?
        .into_iter()
        .find(|c| c.name == column)
        .map(|c| !c.not_null && !c.primary_key))
}

/// How a live table differs from a model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableDiff {
    /// Columns of the model which the table lacks.
    pub added: Vec<ColumnDescriptor>,
    /// Columns of the table which the model lacks.
    pub removed: Vec<String>,
    /// Columns present in both, but with a different type or constraints.
    pub altered: Vec<ColumnDescriptor>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.altered.is_empty()
    }

    /// Whether `ALTER TABLE ADD COLUMN` alone can't reconcile the table.
    ///
    /// Sqlite can add columns but not change them, and can't add unique ones.
    pub fn needs_rebuild(&self) -> bool {
        !self.removed.is_empty() || !self.altered.is_empty() || self.added.iter().any(|c| c.is_unique())
    }
}

/// Diff the live table of a model against the model.  `None` if the table doesn't exist.
pub fn diff_table(conn: &rusqlite::Connection, model: &DynamicModel) -> Result<Option<TableDiff>> {
    if !table_exists(conn, model.get_db_table())? {
        return Ok(None);
    }

    let live = table_columns(conn, model.get_db_table())?;
    let mut diff = TableDiff::default();

    for column in model.iter_columns() {
        match live.iter().find(|l| l.name == column.get_name()) {
            None => diff.added.push(column.clone()),
            Some(l) if !l.matches(column) => diff.altered.push(column.clone()),
            Some(_) => {}
        }
    }

    diff.removed = live
        .iter()
        .filter(|l| model.get_field(&l.name).is_none())
        .map(|l| l.name.clone())
        .collect();

    Ok(Some(diff))
}

/// The SQL sqlite stored for a table, if it exists.
pub fn table_sql(conn: &rusqlite::Connection, table: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |r| r.get(0),
        )
        .optional()?)
}
