//! Database configuration module.
//!
//! Handles connecting to `SQLite` or `PostgreSQL` and creating the tables using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs; the composite-identity index on
//! counters is added separately.

use crate::core::counter::identity_index;
use crate::entities::{CodingCounter, CodingRule};
use crate::errors::{Result, StoreContext};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::info;

/// Used when neither `DATABASE_URL` nor `database_url` in config.toml is set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/coding_rules.sqlite?mode=rwc";

/// Connects to the database at `url`.
///
/// `SQLite` cannot lock individual rows, so `SQLite` pools are limited to a single
/// connection; transactions then run one after another. Other backends rely on
/// `SELECT ... FOR UPDATE` and keep the default pool size.
pub async fn connect(url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(url.to_string());
    if url.starts_with("sqlite:") {
        options.max_connections(1).min_connections(1);
    }
    options.sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .store_context("connecting to database")?;
    info!(backend = ?db.get_database_backend(), "Database connection established");
    Ok(db)
}

/// Creates the rule and counter tables and the counter identity index if missing.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut rule_table = schema.create_table_from_entity(CodingRule);
    let mut counter_table = schema.create_table_from_entity(CodingCounter);

    db.execute(builder.build(rule_table.if_not_exists()))
        .await
        .store_context("creating coding_rules table")?;
    db.execute(builder.build(counter_table.if_not_exists()))
        .await
        .store_context("creating coding_counters table")?;
    db.execute(builder.build(&identity_index()))
        .await
        .store_context("creating coding counter identity index")?;

    Ok(())
}
