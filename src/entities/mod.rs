//! Entity module - Contains the SeaORM entity definitions for the database.
//! Rules are read-mostly configuration; counters are the only mutable shared state.

pub mod coding_counter;
pub mod coding_rule;

// Re-export specific types to avoid conflicts
pub use coding_counter::{
    Column as CodingCounterColumn, Entity as CodingCounter, Model as CodingCounterModel,
};
pub use coding_rule::{Column as CodingRuleColumn, Entity as CodingRule, Model as CodingRuleModel};
