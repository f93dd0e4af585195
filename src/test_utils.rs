//! Shared test utilities.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test rules with sensible defaults.

use crate::{
    core::{
        clock::FixedClock,
        rule::{NewRule, create_rule},
    },
    entities,
    errors::Result,
};
use chrono::{NaiveDate, NaiveDateTime};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = crate::config::database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database in a temporary directory.
///
/// Keep the returned directory alive for as long as the connection is used.
#[allow(clippy::expect_used)]
pub async fn setup_file_test_db() -> Result<(tempfile::TempDir, DatabaseConnection)> {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("coding_rules.sqlite").display()
    );
    let db = crate::config::database::connect(&url).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((dir, db))
}

/// 2024-03-22 09:30:00, the "today" of every test.
#[must_use]
pub fn test_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 22)
        .and_then(|date| date.and_hms_opt(9, 30, 0))
        .unwrap_or_default()
}

/// A clock frozen at [`test_now`].
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(test_now())
}

/// A shareable clock frozen at [`test_now`], for components that hold an `Arc<dyn Clock>`.
#[must_use]
pub fn shared_test_clock() -> Arc<FixedClock> {
    Arc::new(test_clock())
}

/// A valid rule with sensible defaults.
///
/// # Defaults
/// * `type`: "database"
/// * prefix `SJST`, date rule code and `/` separator, all enabled
/// * width 6, starting 1, ending derived (999999)
#[must_use]
pub fn sample_rule(name: &str) -> NewRule {
    NewRule {
        name: name.to_string(),
        rule_type: "database".to_string(),
        prefix: "SJST".to_string(),
        prefix_enabled: true,
        rule_code: String::new(),
        rule_code_enabled: true,
        code_separator: "/".to_string(),
        code_separator_enabled: true,
        digital_code_type: "serial".to_string(),
        digital_code_width: 6,
        digital_code_starting: 1,
        digital_code_ending: None,
        updater_id: "u-1".to_string(),
    }
}

/// Sets up a test database with one sample rule.
/// Returns (db, clock, rule) for common generation scenarios.
pub async fn setup_with_rule() -> Result<(
    DatabaseConnection,
    Arc<FixedClock>,
    entities::coding_rule::Model,
)> {
    let db = setup_test_db().await?;
    let clock = shared_test_clock();
    let rule = create_rule(&db, clock.as_ref(), sample_rule("Test Rule")).await?;
    Ok((db, clock, rule))
}
