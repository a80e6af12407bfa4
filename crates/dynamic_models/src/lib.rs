//! The dynamic models crate.
//!
//! This crate lets models be defined at run time and stores their rows in sqlite.  There are 3 primary entities:
//!
//! - The model schema and its field schemas: rows in bookkeeping tables which say what a model looks like.
//! - The dynamic model: a descriptor built from those rows, registered in an [AppRegistry] and shared behind `Arc`s.
//! - The dynamic table: the real sqlite table holding the model's rows, named `{app_label}_{table}`.
//!
//! Changing a definition goes through [DynamicModels], which writes the bookkeeping rows and the table's DDL in one
//! transaction.  Sqlite can roll DDL back, so a change either fully happens or doesn't happen at all.  Each change
//! bumps the model's [SchemaVersion]; a model declared at an older version refuses to touch rows and fails with
//! [Error::OutdatedModel], and the fix is to fetch the model again.
//!
//! Dynamic tables bypass migrations entirely.  Only the bookkeeping tables are migrated, by tera templates recorded in
//! a migrations table, the same way every time the database is opened.
mod app;
mod cache;
mod config;
mod database;
mod descriptor;
mod errors;
mod factory;
mod field;
mod introspection;
mod lifecycle;
mod model;
pub mod naming;
pub mod records;
mod registry;
mod row_value;
mod schema;
mod signals;
mod store;
mod version;

pub use app::*;
pub use cache::*;
pub use config::*;
pub use database::Database;
pub use descriptor::*;
pub use errors::*;
pub use factory::*;
pub use field::*;
pub use introspection::*;
pub use lifecycle::*;
pub use model::*;
pub use registry::*;
pub use schema::*;
pub use signals::*;
pub use version::*;
