//! Counter storage - Locked access to per-identity sequence counters.
//!
//! A counter is addressed by a [`CounterKey`], never by its primary key. Every column
//! of the key takes part in the lookup, including empty strings, so a rule whose
//! optional components are all disabled still matches exactly one row.

use crate::{
    core::{clock::format_rule_code, render::CodeParts},
    entities::{CodingCounter, coding_counter, coding_rule},
    errors::{Result, StoreContext},
};
use chrono::{NaiveDate, NaiveDateTime};
use sea_orm::{
    Condition, QuerySelect, Set,
    prelude::*,
    sea_query::{Index, IndexCreateStatement, OnConflict},
};

/// Name of the unique index backing the composite identity.
pub const IDENTITY_INDEX: &str = "idx_coding_counters_identity";

/// Composite identity of a counter: the rule plus its effective components.
///
/// Disabled components are empty strings, which are compared as values rather
/// than treated as "no filter".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub rule_id: i64,
    pub prefix: String,
    pub rule_code: String,
    pub code_separator: String,
    pub digital_code_width: i32,
}

impl CounterKey {
    /// Derives the key a rule maps to on `today`. The rule code is always recomputed
    /// from the date; the rule's stored placeholder is ignored.
    #[must_use]
    pub fn for_rule(rule: &coding_rule::Model, today: NaiveDate) -> Self {
        let effective = |enabled: bool, value: &str| {
            if enabled {
                value.to_string()
            } else {
                String::new()
            }
        };
        Self {
            rule_id: rule.id,
            prefix: effective(rule.prefix_enabled, &rule.prefix),
            rule_code: if rule.rule_code_enabled {
                format_rule_code(today)
            } else {
                String::new()
            },
            code_separator: effective(rule.code_separator_enabled, &rule.code_separator),
            digital_code_width: rule.digital_code_width,
        }
    }

    /// Equality predicate over every identity column.
    #[must_use]
    pub fn condition(&self) -> Condition {
        Condition::all()
            .add(coding_counter::Column::RuleId.eq(self.rule_id))
            .add(coding_counter::Column::Prefix.eq(self.prefix.as_str()))
            .add(coding_counter::Column::RuleCode.eq(self.rule_code.as_str()))
            .add(coding_counter::Column::CodeSeparator.eq(self.code_separator.as_str()))
            .add(coding_counter::Column::DigitalCodeWidth.eq(self.digital_code_width))
    }

    /// The textual parts codes under this key are rendered with.
    #[must_use]
    pub fn parts(&self) -> CodeParts<'_> {
        CodeParts {
            prefix: &self.prefix,
            rule_code: &self.rule_code,
            separator: &self.code_separator,
            width: usize::try_from(self.digital_code_width).unwrap_or_default(),
        }
    }
}

/// Builds the unique index over the identity columns.
#[must_use]
pub fn identity_index() -> IndexCreateStatement {
    Index::create()
        .name(IDENTITY_INDEX)
        .table(CodingCounter)
        .col(coding_counter::Column::RuleId)
        .col(coding_counter::Column::Prefix)
        .col(coding_counter::Column::RuleCode)
        .col(coding_counter::Column::CodeSeparator)
        .col(coding_counter::Column::DigitalCodeWidth)
        .unique()
        .if_not_exists()
        .to_owned()
}

/// Finds the counter for `key` and holds an exclusive row lock on it until the
/// surrounding transaction ends. Soft-deleted rows are included.
pub async fn lock_counter<C>(db: &C, key: &CounterKey) -> Result<Option<coding_counter::Model>>
where
    C: ConnectionTrait,
{
    CodingCounter::find()
        .filter(key.condition())
        .lock_exclusive()
        .one(db)
        .await
        .store_context("locking coding counter")
}

/// Inserts the first counter for `key` with `digital_code` as its high-water mark.
///
/// Returns `false` when a concurrent allocation created the row first.
pub async fn insert_counter<C>(
    db: &C,
    key: &CounterKey,
    digital_code: i64,
    now: NaiveDateTime,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let counter = coding_counter::ActiveModel {
        rule_id: Set(key.rule_id),
        prefix: Set(key.prefix.clone()),
        rule_code: Set(key.rule_code.clone()),
        code_separator: Set(key.code_separator.clone()),
        digital_code_width: Set(key.digital_code_width),
        digital_code: Set(digital_code),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    };

    let inserted = CodingCounter::insert(counter)
        .on_conflict(
            OnConflict::columns([
                coding_counter::Column::RuleId,
                coding_counter::Column::Prefix,
                coding_counter::Column::RuleCode,
                coding_counter::Column::CodeSeparator,
                coding_counter::Column::DigitalCodeWidth,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await
        .store_context("inserting coding counter")?;

    Ok(inserted > 0)
}

/// Moves a locked counter's high-water mark to `digital_code`, reviving it if the
/// housekeeper had already marked it deleted.
pub async fn advance_counter<C>(
    db: &C,
    counter: coding_counter::Model,
    digital_code: i64,
    now: NaiveDateTime,
) -> Result<coding_counter::Model>
where
    C: ConnectionTrait,
{
    let mut counter: coding_counter::ActiveModel = counter.into();
    counter.digital_code = Set(digital_code);
    counter.updated_at = Set(now);
    counter.deleted_at = Set(None);
    counter
        .update(db)
        .await
        .store_context("advancing coding counter")
}

/// Looks up a counter without locking it, ignoring whether it is soft-deleted.
pub async fn find_counter<C>(db: &C, key: &CounterKey) -> Result<Option<coding_counter::Model>>
where
    C: ConnectionTrait,
{
    CodingCounter::find()
        .filter(key.condition())
        .one(db)
        .await
        .store_context("reading coding counter")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::{clock::Clock, rule::create_rule};
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, QueryTrait};

    fn rule_model(id: i64) -> coding_rule::Model {
        let now = test_clock().now();
        coding_rule::Model {
            id,
            name: format!("rule-{id}"),
            rule_type: "database".to_string(),
            prefix: "SJST".to_string(),
            prefix_enabled: true,
            rule_code: "19700101".to_string(),
            rule_code_enabled: true,
            code_separator: "/".to_string(),
            code_separator_enabled: true,
            digital_code_type: "serial".to_string(),
            digital_code_width: 6,
            digital_code_starting: 1,
            digital_code_ending: 999_999,
            updater_id: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_key_uses_today_not_stored_rule_code() {
        let key = CounterKey::for_rule(&rule_model(1), test_clock().today());
        assert_eq!(key.rule_code, "20240322");
        assert_eq!(key.prefix, "SJST");
        assert_eq!(key.code_separator, "/");
        assert_eq!(key.digital_code_width, 6);
    }

    #[test]
    fn test_key_collapses_disabled_components() {
        let rule = coding_rule::Model {
            prefix_enabled: false,
            rule_code_enabled: false,
            code_separator_enabled: false,
            ..rule_model(1)
        };
        let key = CounterKey::for_rule(&rule, test_clock().today());
        assert_eq!(key.prefix, "");
        assert_eq!(key.rule_code, "");
        assert_eq!(key.code_separator, "");
    }

    #[test]
    fn test_key_condition_matches_empty_values_explicitly() {
        let rule = coding_rule::Model {
            prefix_enabled: false,
            rule_code_enabled: false,
            code_separator_enabled: false,
            ..rule_model(3)
        };
        let key = CounterKey::for_rule(&rule, test_clock().today());
        let sql = CodingCounter::find()
            .filter(key.condition())
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""prefix" = ''"#), "{sql}");
        assert!(sql.contains(r#""rule_code" = ''"#), "{sql}");
        assert!(sql.contains(r#""code_separator" = ''"#), "{sql}");
        assert!(sql.contains(r#""rule_id" = 3"#), "{sql}");
    }

    #[test]
    fn test_lock_is_exclusive_on_postgres() {
        let key = CounterKey::for_rule(&rule_model(1), test_clock().today());
        let sql = CodingCounter::find()
            .filter(key.condition())
            .lock_exclusive()
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.ends_with("FOR UPDATE"), "{sql}");
    }

    #[tokio::test]
    async fn test_insert_then_lock_and_advance() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let rule = create_rule(&db, &clock, sample_rule("Counter")).await?;
        let key = CounterKey::for_rule(&rule, clock.today());

        assert!(lock_counter(&db, &key).await?.is_none());
        assert!(insert_counter(&db, &key, 5, clock.now()).await?);
        // A second insert for the same identity is absorbed by the unique index
        assert!(!insert_counter(&db, &key, 9, clock.now()).await?);

        let counter = lock_counter(&db, &key).await?.unwrap();
        assert_eq!(counter.digital_code, 5);

        let advanced = advance_counter(&db, counter, 8, clock.now()).await?;
        assert_eq!(advanced.digital_code, 8);
        assert_eq!(find_counter(&db, &key).await?.unwrap().digital_code, 8);
        Ok(())
    }

    #[tokio::test]
    async fn test_advance_revives_soft_deleted_counter() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let rule = create_rule(&db, &clock, sample_rule("Revived")).await?;
        let key = CounterKey::for_rule(&rule, clock.today());
        insert_counter(&db, &key, 3, clock.now()).await?;

        let mut counter: coding_counter::ActiveModel =
            find_counter(&db, &key).await?.unwrap().into();
        counter.deleted_at = Set(Some(clock.now()));
        let counter = counter.update(&db).await.unwrap();

        let locked = lock_counter(&db, &key).await?.unwrap();
        assert_eq!(locked.id, counter.id);
        let revived = advance_counter(&db, locked, 4, clock.now()).await?;
        assert!(revived.deleted_at.is_none());
        Ok(())
    }
}
