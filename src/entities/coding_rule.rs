//! Coding rule entity - Describes how textual codes are composed.
//!
//! A rule combines an optional prefix, an optional date-based rule code, an optional
//! separator and a zero-padded serial number bounded by `digital_code_starting` and
//! `digital_code_ending`. Each component has an `*_enabled` flag; disabled components
//! contribute nothing to the rendered code.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Coding rule database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coding_rules")]
pub struct Model {
    /// Unique identifier for the rule
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display label
    pub name: String,
    /// Kind of asset the rule codes (e.g. `"database"`, `"api"`); never changes after creation
    #[sea_orm(column_name = "type")]
    pub rule_type: String,
    /// Two to six uppercase letters
    pub prefix: String,
    pub prefix_enabled: bool,
    /// Persisted placeholder; the effective rule code is always today's `YYYYMMDD`
    pub rule_code: String,
    pub rule_code_enabled: bool,
    /// One of `_`, `-`, `/`, `\`
    pub code_separator: String,
    pub code_separator_enabled: bool,
    /// Informational label for the serial part (e.g. `"serial"`)
    pub digital_code_type: String,
    /// Number of digits in the serial part (3-9)
    pub digital_code_width: i32,
    /// First serial number issued for a fresh counter
    pub digital_code_starting: i64,
    /// Highest serial number that may be issued; all nines of `digital_code_width`
    pub digital_code_ending: i64,
    /// User who last modified the rule
    pub updater_id: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    /// Soft delete marker - set when the rule is retired
    pub deleted_at: Option<DateTime>,
}

/// Defines relationships between coding rules and their counters
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One rule owns many counters (one per composite identity)
    #[sea_orm(has_many = "super::coding_counter::Entity")]
    Counters,
}

impl Related<super::coding_counter::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Counters.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
