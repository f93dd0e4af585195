//! Coding rule business logic - Handles all rule-related operations.
//!
//! Rules are plain configuration rows: this module creates, looks up, counts, patches
//! and retires them, validating every rule that reaches storage. Deleted rules are
//! soft-deleted and behave as missing for every other operation.

use crate::{
    config::users::UserDirectory,
    core::{clock::Clock, render::generate_digital_code_ending},
    entities::{CodingRule, coding_rule},
    errors::{Error, Result, StoreContext},
};
use sea_orm::{PaginatorTrait, QueryOrder, Select, Set, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Separators a rule may place between the rule code and the serial number.
pub const CODE_SEPARATORS: [&str; 4] = ["_", "-", "/", "\\"];

const MIN_PREFIX_LEN: usize = 2;
const MAX_PREFIX_LEN: usize = 6;
const MIN_DIGITAL_CODE_WIDTH: i32 = 3;
const MAX_DIGITAL_CODE_WIDTH: i32 = 9;

fn default_digital_code_type() -> String {
    "serial".to_string()
}

/// Fields supplied when creating a rule. Also the shape of `[[rules]]` entries in `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRule {
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub prefix_enabled: bool,
    /// Placeholder only; rendering always uses today's date
    #[serde(default)]
    pub rule_code: String,
    #[serde(default)]
    pub rule_code_enabled: bool,
    #[serde(default)]
    pub code_separator: String,
    #[serde(default)]
    pub code_separator_enabled: bool,
    #[serde(default = "default_digital_code_type")]
    pub digital_code_type: String,
    pub digital_code_width: i32,
    pub digital_code_starting: i64,
    /// Derived from the width when omitted
    #[serde(default)]
    pub digital_code_ending: Option<i64>,
    #[serde(default)]
    pub updater_id: String,
}

/// A merge-patch over a rule: `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RulePatch {
    pub id: i64,
    pub name: Option<String>,
    /// Accepted only when it matches the stored type
    #[serde(rename = "type")]
    pub rule_type: Option<String>,
    pub prefix: Option<String>,
    pub prefix_enabled: Option<bool>,
    pub rule_code: Option<String>,
    pub rule_code_enabled: Option<bool>,
    pub code_separator: Option<String>,
    pub code_separator_enabled: Option<bool>,
    pub digital_code_type: Option<String>,
    pub digital_code_width: Option<i32>,
    pub digital_code_starting: Option<i64>,
    pub digital_code_ending: Option<i64>,
    pub updater_id: Option<String>,
}

/// Filter for [`count_rules`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuleFilter {
    pub prefix: Option<String>,
}

/// A rule together with the display name of its last updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleWithUpdater {
    #[serde(flatten)]
    pub rule: coding_rule::Model,
    pub updater_name: Option<String>,
}

/// Borrowed view of the fields that validation looks at.
struct RuleShape<'a> {
    name: &'a str,
    rule_type: &'a str,
    prefix: &'a str,
    prefix_enabled: bool,
    code_separator: &'a str,
    code_separator_enabled: bool,
    digital_code_width: i32,
    digital_code_starting: i64,
    digital_code_ending: i64,
}

impl<'a> From<&'a coding_rule::Model> for RuleShape<'a> {
    fn from(rule: &'a coding_rule::Model) -> Self {
        Self {
            name: &rule.name,
            rule_type: &rule.rule_type,
            prefix: &rule.prefix,
            prefix_enabled: rule.prefix_enabled,
            code_separator: &rule.code_separator,
            code_separator_enabled: rule.code_separator_enabled,
            digital_code_width: rule.digital_code_width,
            digital_code_starting: rule.digital_code_starting,
            digital_code_ending: rule.digital_code_ending,
        }
    }
}

fn validate_shape(rule: &RuleShape<'_>) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(Error::validation("Rule name cannot be empty"));
    }
    if rule.rule_type.trim().is_empty() {
        return Err(Error::validation("Rule type cannot be empty"));
    }

    if rule.prefix_enabled || !rule.prefix.is_empty() {
        let len = rule.prefix.len();
        let well_formed = (MIN_PREFIX_LEN..=MAX_PREFIX_LEN).contains(&len)
            && rule.prefix.chars().all(|c| c.is_ascii_uppercase());
        if !well_formed {
            return Err(Error::validation(format!(
                "Prefix must be {MIN_PREFIX_LEN}-{MAX_PREFIX_LEN} uppercase letters, got {:?}",
                rule.prefix
            )));
        }
    }

    if (rule.code_separator_enabled || !rule.code_separator.is_empty())
        && !CODE_SEPARATORS.contains(&rule.code_separator)
    {
        return Err(Error::validation(format!(
            "Code separator must be one of {CODE_SEPARATORS:?}, got {:?}",
            rule.code_separator
        )));
    }

    if !(MIN_DIGITAL_CODE_WIDTH..=MAX_DIGITAL_CODE_WIDTH).contains(&rule.digital_code_width) {
        return Err(Error::validation(format!(
            "Digital code width must be between {MIN_DIGITAL_CODE_WIDTH} and {MAX_DIGITAL_CODE_WIDTH}, got {}",
            rule.digital_code_width
        )));
    }

    check_digital_code_range(
        rule.digital_code_width,
        rule.digital_code_starting,
        rule.digital_code_ending,
    )
}

/// Checks the serial bounds of a rule: the ending must be all nines of the width
/// and the starting value must lie in `1..=ending`.
///
/// The code generator repeats this check before reserving numbers, since the ending
/// is the hard ceiling of every counter.
pub fn check_digital_code_range(width: i32, starting: i64, ending: i64) -> Result<()> {
    let expected = generate_digital_code_ending(width).ok_or_else(|| {
        Error::validation(format!("Digital code width {width} is not representable"))
    })?;
    if ending != expected {
        return Err(Error::validation(format!(
            "Digital code ending must be {expected} for width {width}, got {ending}"
        )));
    }
    if starting < 1 || starting > ending {
        return Err(Error::validation(format!(
            "Digital code starting must be between 1 and {ending}, got {starting}"
        )));
    }
    Ok(())
}

fn active_rules() -> Select<CodingRule> {
    CodingRule::find().filter(coding_rule::Column::DeletedAt.is_null())
}

/// Retrieves an active rule by its ID.
///
/// # Errors
/// Returns [`Error::RuleNotFound`] when the rule is missing or deleted.
pub async fn get_rule<C>(db: &C, rule_id: i64) -> Result<coding_rule::Model>
where
    C: ConnectionTrait,
{
    active_rules()
        .filter(coding_rule::Column::Id.eq(rule_id))
        .one(db)
        .await
        .store_context("loading coding rule")?
        .ok_or(Error::RuleNotFound { id: rule_id })
}

/// Retrieves all active rules, ordered by ID.
pub async fn list_rules(db: &DatabaseConnection) -> Result<Vec<coding_rule::Model>> {
    active_rules()
        .order_by_asc(coding_rule::Column::Id)
        .all(db)
        .await
        .store_context("listing coding rules")
}

/// Counts active rules, optionally restricted to one prefix.
pub async fn count_rules(db: &DatabaseConnection, filter: &RuleFilter) -> Result<u64> {
    let mut query = active_rules();
    if let Some(prefix) = &filter.prefix {
        query = query.filter(coding_rule::Column::Prefix.eq(prefix.as_str()));
    }
    query.count(db).await.store_context("counting coding rules")
}

/// Lists active rules with the display name of whoever last updated them.
pub async fn list_rules_with_updaters(
    db: &DatabaseConnection,
    directory: &dyn UserDirectory,
) -> Result<Vec<RuleWithUpdater>> {
    let rules = list_rules(db).await?;
    Ok(rules
        .into_iter()
        .map(|rule| {
            let updater_name = directory.display_name(&rule.updater_id);
            RuleWithUpdater { rule, updater_name }
        })
        .collect())
}

/// Creates a new rule after validating its fields.
///
/// # Errors
/// Returns an error if:
/// - Any field fails validation (prefix format, separator, width bounds, mismatched ending)
/// - An active rule with the same name already exists
/// - The database insert fails
pub async fn create_rule(
    db: &DatabaseConnection,
    clock: &dyn Clock,
    new_rule: NewRule,
) -> Result<coding_rule::Model> {
    let name = new_rule.name.trim().to_string();
    let digital_code_ending = match new_rule.digital_code_ending {
        Some(ending) => ending,
        None => generate_digital_code_ending(new_rule.digital_code_width).ok_or_else(|| {
            Error::validation(format!(
                "Digital code width {} is not representable",
                new_rule.digital_code_width
            ))
        })?,
    };

    validate_shape(&RuleShape {
        name: &name,
        rule_type: &new_rule.rule_type,
        prefix: &new_rule.prefix,
        prefix_enabled: new_rule.prefix_enabled,
        code_separator: &new_rule.code_separator,
        code_separator_enabled: new_rule.code_separator_enabled,
        digital_code_width: new_rule.digital_code_width,
        digital_code_starting: new_rule.digital_code_starting,
        digital_code_ending,
    })?;

    let exists = active_rules()
        .filter(coding_rule::Column::Name.eq(name.as_str()))
        .one(db)
        .await
        .store_context("checking coding rule name")?
        .is_some();
    if exists {
        return Err(Error::RuleAlreadyExists { name });
    }

    let now = clock.now();
    let rule = coding_rule::ActiveModel {
        name: Set(name),
        rule_type: Set(new_rule.rule_type),
        prefix: Set(new_rule.prefix),
        prefix_enabled: Set(new_rule.prefix_enabled),
        rule_code: Set(new_rule.rule_code),
        rule_code_enabled: Set(new_rule.rule_code_enabled),
        code_separator: Set(new_rule.code_separator),
        code_separator_enabled: Set(new_rule.code_separator_enabled),
        digital_code_type: Set(new_rule.digital_code_type),
        digital_code_width: Set(new_rule.digital_code_width),
        digital_code_starting: Set(new_rule.digital_code_starting),
        digital_code_ending: Set(digital_code_ending),
        updater_id: Set(new_rule.updater_id),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    };

    let created = rule
        .insert(db)
        .await
        .store_context("inserting coding rule")?;
    info!(rule_id = created.id, name = %created.name, "Created coding rule");
    Ok(created)
}

/// Applies a merge-patch to an active rule.
///
/// Only the fields present in the patch change; the creation timestamp is preserved
/// and the merged rule is validated as a whole.
///
/// # Errors
/// Returns an error if:
/// - The rule does not exist or is deleted
/// - The patch tries to change the rule's type
/// - The merged rule fails validation
/// - The database update fails
pub async fn update_rule(
    db: &DatabaseConnection,
    clock: &dyn Clock,
    patch: RulePatch,
) -> Result<coding_rule::Model> {
    let current = get_rule(db, patch.id).await?;

    if let Some(rule_type) = &patch.rule_type {
        if *rule_type != current.rule_type {
            return Err(Error::validation(format!(
                "Rule type cannot change from {:?} to {rule_type:?}",
                current.rule_type
            )));
        }
    }

    let mut merged = current.clone();
    if let Some(name) = patch.name {
        merged.name = name.trim().to_string();
    }
    if let Some(prefix) = patch.prefix {
        merged.prefix = prefix;
    }
    if let Some(enabled) = patch.prefix_enabled {
        merged.prefix_enabled = enabled;
    }
    if let Some(rule_code) = patch.rule_code {
        merged.rule_code = rule_code;
    }
    if let Some(enabled) = patch.rule_code_enabled {
        merged.rule_code_enabled = enabled;
    }
    if let Some(separator) = patch.code_separator {
        merged.code_separator = separator;
    }
    if let Some(enabled) = patch.code_separator_enabled {
        merged.code_separator_enabled = enabled;
    }
    if let Some(digital_code_type) = patch.digital_code_type {
        merged.digital_code_type = digital_code_type;
    }
    if let Some(width) = patch.digital_code_width {
        merged.digital_code_width = width;
        // A new width implies a new ceiling unless one is given explicitly
        if patch.digital_code_ending.is_none() {
            if let Some(ending) = generate_digital_code_ending(width) {
                merged.digital_code_ending = ending;
            }
        }
    }
    if let Some(starting) = patch.digital_code_starting {
        merged.digital_code_starting = starting;
    }
    if let Some(ending) = patch.digital_code_ending {
        merged.digital_code_ending = ending;
    }
    if let Some(updater_id) = patch.updater_id {
        merged.updater_id = updater_id;
    }

    validate_shape(&RuleShape::from(&merged))?;

    if merged.name != current.name {
        let clash = active_rules()
            .filter(coding_rule::Column::Name.eq(merged.name.as_str()))
            .filter(coding_rule::Column::Id.ne(merged.id))
            .one(db)
            .await
            .store_context("checking coding rule name")?
            .is_some();
        if clash {
            return Err(Error::RuleAlreadyExists { name: merged.name });
        }
    }

    let mut rule: coding_rule::ActiveModel = current.into();
    rule.name = Set(merged.name);
    rule.prefix = Set(merged.prefix);
    rule.prefix_enabled = Set(merged.prefix_enabled);
    rule.rule_code = Set(merged.rule_code);
    rule.rule_code_enabled = Set(merged.rule_code_enabled);
    rule.code_separator = Set(merged.code_separator);
    rule.code_separator_enabled = Set(merged.code_separator_enabled);
    rule.digital_code_type = Set(merged.digital_code_type);
    rule.digital_code_width = Set(merged.digital_code_width);
    rule.digital_code_starting = Set(merged.digital_code_starting);
    rule.digital_code_ending = Set(merged.digital_code_ending);
    rule.updater_id = Set(merged.updater_id);
    rule.updated_at = Set(clock.now());

    let updated = rule
        .update(db)
        .await
        .store_context("updating coding rule")?;
    debug!(rule_id = updated.id, "Updated coding rule");
    Ok(updated)
}

/// Soft deletes a rule. Its counters are left for the housekeeper.
///
/// # Errors
/// Returns [`Error::RuleNotFound`] when the rule is missing or already deleted.
pub async fn delete_rule(
    db: &DatabaseConnection,
    clock: &dyn Clock,
    rule_id: i64,
) -> Result<coding_rule::Model> {
    let mut rule: coding_rule::ActiveModel = get_rule(db, rule_id).await?.into();

    let now = clock.now();
    rule.deleted_at = Set(Some(now));
    rule.updated_at = Set(now);

    let deleted = rule
        .update(db)
        .await
        .store_context("deleting coding rule")?;
    info!(rule_id, "Deleted coding rule");
    Ok(deleted)
}
