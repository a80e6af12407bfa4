//! The database wraps a rusqlite connection and owns the bookkeeping tables.
//!
//! The bookkeeping tables hold the model and field schemas.  Unlike dynamic tables they have a fixed shape, so they are
//! created and evolved by migrations: tera templates run in order, each exactly once, and recorded in a migrations
//! table.  Dynamic tables never go through here; their DDL comes from [crate::schema].
use std::path::Path;

use log::*;

use crate::errors::Result;
use crate::naming::quote_ident;

pub(crate) const MODEL_SCHEMA_TABLE: &str = "dynamic_models_modelschema";
pub(crate) const FIELD_SCHEMA_TABLE: &str = "dynamic_models_fieldschema";
const MIGRATIONS_TABLE: &str = "dynamic_models_migrations";

/// Whether `table` can never be a dynamic table: it is a bookkeeping table, a rebuild's temporary table, or sqlite's.
pub(crate) fn is_reserved_table(table: &str) -> bool {
    let table = table.to_lowercase();
    [MODEL_SCHEMA_TABLE, FIELD_SCHEMA_TABLE, MIGRATIONS_TABLE].contains(&table.as_str())
        || table.starts_with("new__")
        || table.starts_with("sqlite_")
}

pub struct Database {
    conn: rusqlite::Connection,
}

/// SQL that we run as part of opening a connection.
///
/// - Sets up WAL.
/// - Enables the busy timeout
/// - Makes sure the WAL file is truncated, since it can grow large.
/// - Enables foreign key enforcement, which the field schema table relies on to go away with its model.
const INITIAL_SQL: &str = r#"
PRAGMA busy_timeout = 1000;
PRAGMA foreign_keys = 1;
pragma journal_mode = WAL;
PRAGMA wal_autocheckpoint = 10000;
PRAGMA wal_checkpoint(full);
"#;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Migrations for the bookkeeping tables.  Append only: a migration which already ran is never run again, so editing
/// one does nothing to existing databases.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_initial",
        sql: r#"
        CREATE TABLE {{ model_schema }} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            -- Human name of the model, from which everything else is derived.
            name TEXT NOT NULL,
            app_label TEXT NOT NULL,
            db_table TEXT NOT NULL UNIQUE,
            version INTEGER NOT NULL,
            -- RFC 3339 UTC timestamp.
            modified TEXT NOT NULL,
            UNIQUE(app_label, name)
        );

        CREATE TABLE {{ field_schema }} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model_id INTEGER NOT NULL REFERENCES {{ model_schema }}(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            kind TEXT NOT NULL,
            "null" INTEGER NOT NULL,
            "unique" INTEGER NOT NULL,
            max_length INTEGER,
            UNIQUE(model_id, column_name)
        );
        "#,
    },
    Migration {
        name: "0002_field_schema_model_index",
        sql: r#"
        CREATE INDEX {{ field_schema_model_index }} ON {{ field_schema }}(model_id, id);
        "#,
    },
];

/// Run the migrations for the bookkeeping tables, creating the migrations table if necessary.
///
/// Note that the migrations table is, in effect, the only thing we can't migrate without a lot of work.
fn run_migrations(conn: &mut rusqlite::Connection) -> Result<()> {
    let transaction = conn.transaction()?;

    transaction.execute(
        &format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
            -- Name of the migration.
            name TEXT NOT NULL UNIQUE,
            -- The specific sql run for this migration after template rendering, which can be useful for debugging.
            sql TEXT NOT NULL,
            -- Unix timestamp as real seconds
            ran_at REAL NOT NULL,
            -- Duration taken as real seconds.
            duration REAL NOT NULL
        )"#,
            quote_ident(MIGRATIONS_TABLE)
        ),
        [],
    )?;

    let mut ctx = tera::Context::new();
    ctx.insert("model_schema", &quote_ident(MODEL_SCHEMA_TABLE));
    ctx.insert("field_schema", &quote_ident(FIELD_SCHEMA_TABLE));
    ctx.insert(
        "field_schema_model_index",
        &quote_ident(&format!("{}_model_idx", FIELD_SCHEMA_TABLE)),
    );

    for mig in MIGRATIONS {
        let had_migration = transaction
            .prepare(&format!(
                "SELECT * FROM {} WHERE name = ?",
                quote_ident(MIGRATIONS_TABLE)
            ))?
            .exists([mig.name])?;
        if had_migration {
            continue;
        }

        let ran_at = time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9;
        let start_time = std::time::Instant::now();
        let statements = tera::Tera::one_off(mig.sql, &ctx, false)?;
        transaction.execute_batch(&statements)?;
        let duration = start_time.elapsed().as_secs_f64();
        info!("Ran bookkeeping migration {} in {:.3}s", mig.name, duration);

        transaction.execute(
            &format!(
                "INSERT INTO {}(name, sql, ran_at, duration) VALUES(?, ?, ?, ?)",
                quote_ident(MIGRATIONS_TABLE)
            ),
            rusqlite::params![mig.name, statements.as_str(), ran_at, duration],
        )?;
    }

    transaction.commit()?;
    Ok(())
}

impl Database {
    /// Open (creating if needed) the database in the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("database.sqlite");
        info!("Opening database at {}", path.display());
        let conn = rusqlite::Connection::open(&path)?;
        Database::with_connection(conn)
    }

    /// Build a database from an already-existing connection, e.g. `Connection::open_in_memory`.
    pub fn with_connection(mut conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(INITIAL_SQL)?;
        run_migrations(&mut conn)?;
        Ok(Database { conn })
    }

    pub fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// A transaction: drop rolls back, calling commit commits.
    ///
    /// DDL run inside it is rolled back too.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::introspection::table_exists;

    #[test]
    fn opens() {
        let tdir = tempfile::TempDir::new().unwrap();
        let db = Database::open(tdir.path()).expect("Database should open");
        assert!(table_exists(db.connection(), MODEL_SCHEMA_TABLE).unwrap());
        assert!(table_exists(db.connection(), FIELD_SCHEMA_TABLE).unwrap());
    }

    /// Will detect if we ran migrations twice.
    #[test]
    fn opens_twice() {
        let tdir = tempfile::TempDir::new().unwrap();
        Database::open(tdir.path()).expect("Database should open");
        let db = Database::open(tdir.path()).expect("Database should open");

        let count: i64 = db
            .connection()
            .query_row(
                &format!("SELECT count(*) FROM {}", quote_ident(MIGRATIONS_TABLE)),
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[test]
    fn reserved_tables() {
        assert!(is_reserved_table(MODEL_SCHEMA_TABLE));
        assert!(is_reserved_table("Dynamic_Models_FieldSchema"));
        assert!(is_reserved_table(MIGRATIONS_TABLE));
        assert!(is_reserved_table("new__dynamic_models_person"));
        assert!(is_reserved_table("sqlite_sequence"));
        assert!(!is_reserved_table("dynamic_models_person"));
    }

    #[test]
    fn transactions_roll_back_ddl() {
        let mut db =
            Database::with_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        {
            let tx = db.transaction().unwrap();
            tx.execute("CREATE TABLE rolled_back (x INTEGER)", []).unwrap();
        }
        assert!(!table_exists(db.connection(), "rolled_back").unwrap());
    }
}
