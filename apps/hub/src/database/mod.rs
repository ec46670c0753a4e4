/// Database abstraction layer
///
/// The hub only touches the datastore through the `Store` trait; the
/// management API owns target and owner CRUD and shares this schema.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{LibsqlStore, Store};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
