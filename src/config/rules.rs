//! Seeding of coding rules declared in config.toml.
//!
//! Each `[[rules]]` entry is created on startup unless an active rule with the
//! same name already exists, so restarting the service never duplicates rules
//! or overwrites edits made since the first run.

use crate::{
    core::{
        clock::Clock,
        rule::{NewRule, create_rule},
    },
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use tracing::{info, warn};

/// Creates the configured rules that do not exist yet.
///
/// Returns the number of rules created.
///
/// # Errors
/// Returns an error if a configured rule is invalid or the database fails.
pub async fn seed_rules(
    db: &DatabaseConnection,
    clock: &dyn Clock,
    rules: &[NewRule],
) -> Result<usize> {
    info!(
        "Starting to seed coding rules. Found {} configurations from TOML.",
        rules.len()
    );

    let mut created = 0;
    for rule in rules {
        match create_rule(db, clock, rule.clone()).await {
            Ok(model) => {
                info!(rule_id = model.id, "Seeded coding rule '{}'", model.name);
                created += 1;
            }
            Err(Error::RuleAlreadyExists { name }) => {
                warn!("Coding rule '{}' already exists. Skipping.", name);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(created)
}
