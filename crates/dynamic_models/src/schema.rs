//! Applying schema changes to dynamic tables.
//!
//! This is the only place DDL for dynamic tables comes from.  There are two ways in:
//!
//! - The editors, [ModelSchemaEditor] and [FieldSchemaEditor], apply one known change: create/rename/drop a table,
//!   add/alter/drop a column.  The lifecycle hooks use these, since they know exactly what changed.
//! - [synchronize] diffs a model against its live table and does whatever is needed to make them match.  This is for
//!   converging tables whose history we don't know, e.g. after a crash or out-of-band edits.
//!
//! Sqlite can add, rename, and (recently) drop columns, but it can't change a column's type or constraints.  For
//! those, and for drops, the table is rebuilt: create the new shape under a temporary name, copy the rows, drop the
//! old table, and rename the new one into place.  Everything runs on the connection it's given, so callers pass a
//! transaction and a failure anywhere rolls the whole change back.
use itertools::Itertools;
use log::*;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::descriptor::{ColumnDescriptor, DynamicModel};
use crate::errors::{Error, Result};
use crate::field::FieldKind;
use crate::introspection::{diff_table, table_columns, table_exists};
use crate::naming::quote_ident;

const CREATE_TABLE_TEMPLATE: &str = r#"
CREATE TABLE {{ table }} (
    {{ columns | join(sep=", ") }}
)
"#;

const COPY_TEMPLATE: &str = r#"
INSERT INTO {{ new_table }} ({{ targets | join(sep=", ") }})
SELECT {{ sources | join(sep=", ") }} FROM {{ old_table }}
"#;

fn execute(conn: &rusqlite::Connection, sql: &str) -> Result<()> {
    debug!("Schema change: {}", sql.trim());
    conn.execute_batch(sql)?;
    Ok(())
}

fn build_create_table(table: &str, columns: &[ColumnDescriptor]) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("table", &quote_ident(table));
    context.insert(
        "columns",
        &columns
            .iter()
            .map(|c| c.definition_sql())
            .collect::<Vec<_>>(),
    );
    Ok(tera::Tera::one_off(CREATE_TABLE_TEMPLATE, &context, false)?)
}

/// The value rows get for a NOT NULL column which is new to them.
fn effective_default(kind: FieldKind) -> Result<String> {
    Ok(match kind {
        FieldKind::Char | FieldKind::Text => "''".into(),
        FieldKind::Integer | FieldKind::Boolean => "0".into(),
        FieldKind::Float => "0.0".into(),
        FieldKind::DateTime => format!("'{}'", OffsetDateTime::now_utc().format(&Rfc3339)?),
    })
}

/// Rebuild `table` so that it has exactly `columns`.
///
/// `source_of` maps a new column name to the name of the existing column its data comes from, or `None` if it has
/// none.  New NOT NULL columns, and NOT NULL columns fed from a nullable one, get the kind's effective default.
fn rebuild_table(
    conn: &rusqlite::Connection,
    table: &str,
    columns: &[ColumnDescriptor],
    source_of: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let temp_table = format!("new__{}", table);
    info!("Rebuilding table {}", table);

    let live = table_columns(conn, table)?;
    let mut targets = vec![];
    let mut sources = vec![];

    for column in columns {
        let source = source_of(column.get_name())
            .filter(|s| live.iter().any(|l| &l.name == s))
            .map(|s| quote_ident(&s));

        let expr = match (source, column.is_nullable() || column.is_primary_key()) {
            (Some(s), true) => s,
            (Some(s), false) => format!("COALESCE({}, {})", s, effective_default(column.get_kind())?),
            (None, true) => continue,
            (None, false) => effective_default(column.get_kind())?,
        };

        targets.push(quote_ident(column.get_name()));
        sources.push(expr);
    }

    execute(conn, &build_create_table(&temp_table, columns)?)?;

    if !targets.is_empty() {
        let mut context = tera::Context::new();
        context.insert("new_table", &quote_ident(&temp_table));
        context.insert("old_table", &quote_ident(table));
        context.insert("targets", &targets);
        context.insert("sources", &sources);
        execute(conn, &tera::Tera::one_off(COPY_TEMPLATE, &context, false)?)?;
    }

    execute(conn, &format!("DROP TABLE {}", quote_ident(table)))?;
    execute(
        conn,
        &format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&temp_table),
            quote_ident(table)
        ),
    )?;
    Ok(())
}

/// Table-level changes.
///
/// Changes which move a table from one shape to another need the model as it was; give it with
/// [ModelSchemaEditor::with_initial].
pub struct ModelSchemaEditor<'a> {
    conn: &'a rusqlite::Connection,
    initial: Option<&'a DynamicModel>,
}

impl<'a> ModelSchemaEditor<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self {
            conn,
            initial: None,
        }
    }

    pub fn with_initial(conn: &'a rusqlite::Connection, initial: &'a DynamicModel) -> Self {
        Self {
            conn,
            initial: Some(initial),
        }
    }

    pub fn create_table(&self, model: &DynamicModel) -> Result<()> {
        info!(
            "Creating table {} for {}",
            model.get_db_table(),
            model.get_model_name()
        );
        let columns = model.iter_columns().cloned().collect::<Vec<_>>();
        execute(self.conn, &build_create_table(model.get_db_table(), &columns)?)
    }

    /// Create the table if it doesn't exist, otherwise move the initial model's table to the model's.
    pub fn update_table(&self, model: &DynamicModel) -> Result<()> {
        match self.initial {
            Some(initial) if table_exists(self.conn, initial.get_db_table())? => {
                self.alter_table(model)
            }
            _ if table_exists(self.conn, model.get_db_table())? => Ok(()),
            _ => self.create_table(model),
        }
    }

    /// Rename the initial model's table to the model's table.
    pub fn alter_table(&self, model: &DynamicModel) -> Result<()> {
        let initial = self.initial.ok_or_else(|| {
            Error::invalid_field(
                model.get_model_name(),
                "altering a table needs the initial model",
            )
        })?;

        if initial.get_db_table() == model.get_db_table() {
            return Ok(());
        }

        info!(
            "Renaming table {} to {}",
            initial.get_db_table(),
            model.get_db_table()
        );
        execute(
            self.conn,
            &format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(initial.get_db_table()),
                quote_ident(model.get_db_table())
            ),
        )
    }

    /// Drop the table.  Its rows are gone for good.
    pub fn drop_table(&self, model: &DynamicModel) -> Result<()> {
        info!(
            "Dropping table {} of {}",
            model.get_db_table(),
            model.get_model_name()
        );
        execute(
            self.conn,
            &format!("DROP TABLE IF EXISTS {}", quote_ident(model.get_db_table())),
        )
    }
}

/// Column-level changes.
///
/// Changes which move a column from one definition to another need the column as it was; give it with
/// [FieldSchemaEditor::with_initial].
pub struct FieldSchemaEditor<'a> {
    conn: &'a rusqlite::Connection,
    initial: Option<&'a ColumnDescriptor>,
}

impl<'a> FieldSchemaEditor<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self {
            conn,
            initial: None,
        }
    }

    pub fn with_initial(conn: &'a rusqlite::Connection, initial: &'a ColumnDescriptor) -> Self {
        Self {
            conn,
            initial: Some(initial),
        }
    }

    fn has_column(&self, model: &DynamicModel, column: &str) -> Result<bool> {
        Ok(table_columns(self.conn, model.get_db_table())?
            .iter()
            .any(|c| c.name == column))
    }

    /// Add `column` of `model` to the model's table.
    pub fn add_column(&self, model: &DynamicModel, column: &ColumnDescriptor) -> Result<()> {
        info!(
            "Adding column {} to {}",
            column.get_name(),
            model.get_db_table()
        );

        if column.is_unique() {
            // Sqlite won't add a unique column in place.
            let name = column.get_name().to_string();
            let columns = model.iter_columns().cloned().collect::<Vec<_>>();
            return rebuild_table(self.conn, model.get_db_table(), &columns, |c| {
                (c != name).then(|| c.to_string())
            });
        }

        let mut def = column.definition_sql();
        if !column.is_nullable() {
            def.push_str(" DEFAULT ");
            def.push_str(&effective_default(column.get_kind())?);
        }
        execute(
            self.conn,
            &format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(model.get_db_table()),
                def
            ),
        )
    }

    /// Add the column if it isn't there, otherwise alter the initial column into it.
    pub fn update_column(&self, model: &DynamicModel, column: &ColumnDescriptor) -> Result<()> {
        match self.initial {
            Some(initial) if self.has_column(model, initial.get_name())? => {
                self.alter_column(model, column)
            }
            _ if self.has_column(model, column.get_name())? => Ok(()),
            _ => self.add_column(model, column),
        }
    }

    /// Change the initial column into `column`, which belongs to `model`.
    ///
    /// A pure rename is done in place; anything else rebuilds the table.
    pub fn alter_column(&self, model: &DynamicModel, column: &ColumnDescriptor) -> Result<()> {
        let initial = self.initial.ok_or_else(|| {
            Error::invalid_field(column.get_name(), "altering a column needs the initial column")
        })?;

        info!(
            "Altering column {} of {} to {}",
            initial.get_name(),
            model.get_db_table(),
            column.get_name()
        );

        if &initial.renamed(column.get_name()) == column {
            if initial.get_name() == column.get_name() {
                return Ok(());
            }
            return execute(
                self.conn,
                &format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    quote_ident(model.get_db_table()),
                    quote_ident(initial.get_name()),
                    quote_ident(column.get_name())
                ),
            );
        }

        let old_name = initial.get_name().to_string();
        let new_name = column.get_name().to_string();
        let columns = model.iter_columns().cloned().collect::<Vec<_>>();
        rebuild_table(self.conn, model.get_db_table(), &columns, |c| {
            if c == new_name {
                Some(old_name.clone())
            } else {
                Some(c.to_string())
            }
        })
    }

    /// Drop the column named `column` from the model's table.  The data in it is gone for good.
    ///
    /// `model` may or may not still contain the column.
    pub fn drop_column(&self, model: &DynamicModel, column: &str) -> Result<()> {
        info!("Dropping column {} of {}", column, model.get_db_table());
        let columns = model
            .iter_columns()
            .filter(|c| c.get_name() != column)
            .cloned()
            .collect::<Vec<_>>();
        rebuild_table(self.conn, model.get_db_table(), &columns, |c| {
            Some(c.to_string())
        })
    }
}

/// What [synchronize] had to do.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Unchanged,
    Created,
    /// Columns were added in place.
    Extended,
    Rebuilt,
}

/// Make the live table of `model` match `model`.
///
/// Columns are matched by name: missing ones are added, extra ones dropped along with their data, and changed ones
/// converted by rebuilding the table.
pub fn synchronize(conn: &rusqlite::Connection, model: &DynamicModel) -> Result<SyncOutcome> {
    let diff = match diff_table(conn, model)? {
        None => {
            ModelSchemaEditor::new(conn).create_table(model)?;
            return Ok(SyncOutcome::Created);
        }
        Some(d) => d,
    };

    if diff.is_empty() {
        debug!("{} is up to date", model.get_db_table());
        return Ok(SyncOutcome::Unchanged);
    }

    info!(
        "Synchronizing {}: added [{}], removed [{}], altered [{}]",
        model.get_db_table(),
        diff.added.iter().map(|c| c.get_name()).join(", "),
        diff.removed.iter().join(", "),
        diff.altered.iter().map(|c| c.get_name()).join(", "),
    );

    if !diff.removed.is_empty() {
        warn!(
            "Dropping columns [{}] of {}, which {} doesn't have, along with their data",
            diff.removed.iter().join(", "),
            model.get_db_table(),
            model.get_model_name()
        );
    }

    if !diff.needs_rebuild() {
        let editor = FieldSchemaEditor::new(conn);
        for column in diff.added.iter() {
            editor.add_column(model, column)?;
        }
        return Ok(SyncOutcome::Extended);
    }

    let columns = model.iter_columns().cloned().collect::<Vec<_>>();
    rebuild_table(conn, model.get_db_table(), &columns, |c| Some(c.to_string()))?;
    Ok(SyncOutcome::Rebuilt)
}
