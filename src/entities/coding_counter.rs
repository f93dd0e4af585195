//! Coding counter entity - Persisted high-water mark for one composite identity.
//!
//! The identity is `(rule_id, prefix, rule_code, code_separator, digital_code_width)`
//! where disabled rule components are stored as empty strings. `digital_code` is the
//! last serial number already issued for that identity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Coding counter database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coding_counters")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning rule
    pub rule_id: i64,
    /// Effective prefix, empty when the rule's prefix is disabled
    pub prefix: String,
    /// Effective rule code (`YYYYMMDD`), empty when disabled
    pub rule_code: String,
    /// Effective separator, empty when disabled
    pub code_separator: String,
    pub digital_code_width: i32,
    /// Last serial number issued
    pub digital_code: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    /// Set by the housekeeper once the identity is stale
    pub deleted_at: Option<DateTime>,
}

/// Defines relationships between Counter and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each counter belongs to one rule
    #[sea_orm(
        belongs_to = "super::coding_rule::Entity",
        from = "Column::RuleId",
        to = "super::coding_rule::Column::Id"
    )]
    Rule,
}

impl Related<super::coding_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
