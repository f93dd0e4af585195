//! Code generation - Issues blocks of unique, increasing codes for a rule.
//!
//! Each call reserves a contiguous serial range under an exclusive lock on the
//! counter row for the rule's current composite identity. The ceiling check and
//! the counter write happen inside one transaction: either the whole range is
//! reserved and persisted, or nothing changes.

use crate::{
    core::{
        clock::Clock,
        counter::{CounterKey, advance_counter, insert_counter, lock_counter},
        rule::{check_digital_code_range, get_rule},
    },
    entities::{coding_counter, coding_rule},
    errors::{Error, Result, StoreContext},
};
use chrono::NaiveDateTime;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use std::{ops::RangeInclusive, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Issues codes for coding rules.
#[derive(Clone)]
pub struct CodeGenerator {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

/// A reserved range whose transaction has not been committed yet.
struct Reservation {
    txn: DatabaseTransaction,
    key: CounterKey,
    range: RangeInclusive<i64>,
}

impl CodeGenerator {
    #[must_use]
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Issues `count` new codes for the rule, in ascending order.
    ///
    /// # Errors
    /// Returns an error if:
    /// - `count` is zero, or the rule's serial bounds are inconsistent (`Validation`)
    /// - The rule does not exist (`RuleNotFound`)
    /// - The reservation would pass the rule's digital code ending (`ExceedEnding`)
    /// - The database fails (`Store`)
    pub async fn generate(&self, rule_id: i64, count: u32) -> Result<Vec<String>> {
        self.issue(rule_id, count, None).await
    }

    /// Like [`generate`](Self::generate), but gives up when `cancel` fires before
    /// the reservation commits.
    ///
    /// Once the commit has started the call runs to completion and returns the
    /// codes, so a cancelled call never leaves the counter advanced.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if the token fires before the commit,
    /// otherwise the same errors as [`generate`](Self::generate).
    pub async fn generate_cancellable(
        &self,
        rule_id: i64,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.issue(rule_id, count, Some(cancel)).await
    }

    async fn issue(
        &self,
        rule_id: i64,
        count: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<String>> {
        if count == 0 {
            return Err(Error::validation("At least one code must be requested"));
        }

        // Dropping `prepare` mid-flight drops its transaction, which rolls it back
        let prepared = tokio::select! {
            biased;
            () = cancelled(cancel) => Err(Error::Cancelled),
            prepared = self.prepare(rule_id, count) => prepared,
        };
        let Reservation { txn, key, range } = prepared?;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            rollback(txn, rule_id).await;
            return Err(Error::Cancelled);
        }

        // The commit is never raced against cancellation
        txn.commit()
            .await
            .store_context("committing code reservation")?;

        debug!(
            rule_id,
            starting = range.start(),
            ending = range.end(),
            "Reserved coding range"
        );
        Ok(key.parts().render_range(range))
    }

    /// Loads the rule and reserves the range inside a new, uncommitted transaction.
    async fn prepare(&self, rule_id: i64, count: u32) -> Result<Reservation> {
        let rule = get_rule(&self.db, rule_id).await?;
        check_digital_code_range(
            rule.digital_code_width,
            rule.digital_code_starting,
            rule.digital_code_ending,
        )?;

        let now = self.clock.now();
        let key = CounterKey::for_rule(&rule, now.date());

        let txn = self
            .db
            .begin()
            .await
            .store_context("starting code reservation")?;
        match reserve(&txn, &key, &rule, count, now).await {
            Ok(range) => Ok(Reservation { txn, key, range }),
            Err(e) => {
                rollback(txn, rule_id).await;
                Err(e)
            }
        }
    }
}

/// Resolves when `cancel` fires; never resolves without a token.
async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn rollback(txn: DatabaseTransaction, rule_id: i64) {
    if let Err(e) = txn.rollback().await {
        warn!(rule_id, error = %e, "Failed to roll back code reservation");
    }
}

/// Reserves `count` serial numbers for `key` and records the new high-water mark.
async fn reserve(
    txn: &DatabaseTransaction,
    key: &CounterKey,
    rule: &coding_rule::Model,
    count: u32,
    now: NaiveDateTime,
) -> Result<RangeInclusive<i64>> {
    match lock_counter(txn, key).await? {
        Some(counter) => advance(txn, counter, rule, count, now).await,
        None => reserve_first(txn, key, rule, count, now).await,
    }
}

/// Creates the counter for an identity seen for the first time. If a concurrent
/// allocation created it after our lookup, continues from that row's mark instead.
async fn reserve_first(
    txn: &DatabaseTransaction,
    key: &CounterKey,
    rule: &coding_rule::Model,
    count: u32,
    now: NaiveDateTime,
) -> Result<RangeInclusive<i64>> {
    let starting = rule.digital_code_starting;
    let ending = reserve_ending(starting, count, rule.digital_code_ending)?;
    if insert_counter(txn, key, ending, now).await? {
        return Ok(starting..=ending);
    }

    let counter = lock_counter(txn, key).await?.ok_or_else(|| Error::Store {
        context: "locking coding counter after insert conflict",
        source: DbErr::RecordNotFound(format!("coding counter for rule {}", key.rule_id)),
    })?;
    advance(txn, counter, rule, count, now).await
}

async fn advance(
    txn: &DatabaseTransaction,
    counter: coding_counter::Model,
    rule: &coding_rule::Model,
    count: u32,
    now: NaiveDateTime,
) -> Result<RangeInclusive<i64>> {
    let next = counter.digital_code.saturating_add(1);
    let starting = rule.digital_code_starting.max(next);
    let ending = reserve_ending(starting, count, rule.digital_code_ending)?;
    advance_counter(txn, counter, ending, now).await?;
    Ok(starting..=ending)
}

/// Last serial of a `count`-long block from `starting`, if it stays within `ceiling`.
fn reserve_ending(starting: i64, count: u32, ceiling: i64) -> Result<i64> {
    starting
        .checked_add(i64::from(count) - 1)
        .filter(|ending| *ending <= ceiling)
        .ok_or(Error::ExceedEnding {
            starting,
            count,
            ending: ceiling,
        })
}
