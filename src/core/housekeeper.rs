//! Background reclamation of obsolete counters.
//!
//! A counter whose rule code is a past date can no longer be reached by the code
//! generator. Two cancellable loops clean those up: a frequent sweep that soft-deletes
//! a small batch of stale counters, and a daily sweep that permanently removes
//! counters soft-deleted longer than the retention window. Each batch runs in its
//! own short transaction and skips rows another transaction has locked.

use crate::{
    config::HousekeepingConfig,
    core::clock::Clock,
    entities::{CodingCounter, coding_counter},
    errors::{Result, StoreContext},
};
use chrono::{NaiveDateTime, TimeDelta};
use sea_orm::{
    DatabaseConnection, QueryOrder, QuerySelect, TransactionTrait,
    prelude::*,
    sea_query::{Expr, LockBehavior, LockType},
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Soft-deletes up to `batch` live counters whose rule code is a date other than
/// `today_code`. Counters without a rule code never go stale.
///
/// Returns the number of counters marked deleted.
pub async fn soft_delete_stale_counters(
    db: &DatabaseConnection,
    today_code: &str,
    now: NaiveDateTime,
    batch: u64,
) -> Result<u64> {
    let txn = db.begin().await.store_context("starting soft-delete sweep")?;

    let ids: Vec<i64> = CodingCounter::find()
        .select_only()
        .column(coding_counter::Column::Id)
        .filter(coding_counter::Column::DeletedAt.is_null())
        .filter(coding_counter::Column::RuleCode.ne(""))
        .filter(coding_counter::Column::RuleCode.ne(today_code))
        .order_by_asc(coding_counter::Column::Id)
        .limit(batch)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
        .into_tuple()
        .all(&txn)
        .await
        .store_context("selecting stale coding counters")?;

    if ids.is_empty() {
        txn.commit().await.store_context("finishing soft-delete sweep")?;
        return Ok(0);
    }

    let result = CodingCounter::update_many()
        .col_expr(coding_counter::Column::DeletedAt, Expr::value(now))
        .col_expr(coding_counter::Column::UpdatedAt, Expr::value(now))
        .filter(coding_counter::Column::Id.is_in(ids))
        .exec(&txn)
        .await
        .store_context("soft-deleting stale coding counters")?;

    txn.commit().await.store_context("finishing soft-delete sweep")?;
    Ok(result.rows_affected)
}

/// Permanently removes up to `batch` counters soft-deleted at or before `cutoff`.
///
/// Returns the number of counters removed.
pub async fn purge_deleted_counters(
    db: &DatabaseConnection,
    cutoff: NaiveDateTime,
    batch: u64,
) -> Result<u64> {
    let txn = db.begin().await.store_context("starting hard-delete sweep")?;

    let ids: Vec<i64> = CodingCounter::find()
        .select_only()
        .column(coding_counter::Column::Id)
        .filter(coding_counter::Column::DeletedAt.is_not_null())
        .filter(coding_counter::Column::DeletedAt.lte(cutoff))
        .order_by_asc(coding_counter::Column::Id)
        .limit(batch)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
        .into_tuple()
        .all(&txn)
        .await
        .store_context("selecting deleted coding counters")?;

    if ids.is_empty() {
        txn.commit().await.store_context("finishing hard-delete sweep")?;
        return Ok(0);
    }

    let result = CodingCounter::delete_many()
        .filter(coding_counter::Column::Id.is_in(ids))
        .exec(&txn)
        .await
        .store_context("purging deleted coding counters")?;

    txn.commit().await.store_context("finishing hard-delete sweep")?;
    Ok(result.rows_affected)
}

#[derive(Debug, Clone, Copy)]
enum Sweep {
    SoftDelete,
    HardDelete,
}

impl Sweep {
    const fn name(self) -> &'static str {
        match self {
            Self::SoftDelete => "soft-delete",
            Self::HardDelete => "hard-delete",
        }
    }
}

/// Owns the counter cleanup loops. Consumed by [`Housekeeper::start`], so one
/// housekeeper is started at most once.
pub struct Housekeeper {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
    config: HousekeepingConfig,
}

impl Housekeeper {
    #[must_use]
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>, config: HousekeepingConfig) -> Self {
        Self { db, clock, config }
    }

    /// Runs one soft-delete batch against today's rule code.
    pub async fn run_soft_delete_sweep(&self) -> Result<u64> {
        soft_delete_stale_counters(
            &self.db,
            &self.clock.rule_code(),
            self.clock.now(),
            self.config.soft_delete_batch,
        )
        .await
    }

    /// Runs one hard-delete batch for counters past the retention window.
    pub async fn run_hard_delete_sweep(&self) -> Result<u64> {
        let cutoff = self.clock.now() - TimeDelta::hours(self.config.retention_hours);
        purge_deleted_counters(&self.db, cutoff, self.config.hard_delete_batch).await
    }

    async fn run_sweep(&self, sweep: Sweep) -> Result<u64> {
        match sweep {
            Sweep::SoftDelete => self.run_soft_delete_sweep().await,
            Sweep::HardDelete => self.run_hard_delete_sweep().await,
        }
    }

    /// Spawns both sweep loops. They run until `cancel` is triggered.
    #[must_use]
    pub fn start(self, cancel: CancellationToken) -> HousekeeperHandle {
        let soft_every = Duration::from_secs(self.config.soft_delete_interval_secs);
        let hard_every = Duration::from_secs(self.config.hard_delete_interval_secs);
        let this = Arc::new(self);

        let soft = tokio::spawn(Arc::clone(&this).run_loop(
            Sweep::SoftDelete,
            soft_every,
            cancel.clone(),
        ));
        let hard = tokio::spawn(this.run_loop(Sweep::HardDelete, hard_every, cancel));

        HousekeeperHandle { soft, hard }
    }

    async fn run_loop(self: Arc<Self>, sweep: Sweep, every: Duration, cancel: CancellationToken) {
        tracing::info!(
            sweep = sweep.name(),
            interval_secs = every.as_secs(),
            "Counter housekeeping started"
        );

        let mut interval = tokio::time::interval(every);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(sweep = sweep.name(), "Counter housekeeping stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_sweep(sweep).await {
                        Ok(affected) => {
                            if affected > 0 {
                                tracing::info!(sweep = sweep.name(), affected, "Counter housekeeping: swept counters");
                            } else {
                                tracing::debug!(sweep = sweep.name(), "Counter housekeeping: nothing to sweep");
                            }
                        }
                        Err(e) => {
                            tracing::error!(sweep = sweep.name(), error = %e, "Counter housekeeping: sweep failed");
                        }
                    }
                }
            }
        }
    }
}

/// Join handles for the running sweep loops.
pub struct HousekeeperHandle {
    soft: JoinHandle<()>,
    hard: JoinHandle<()>,
}

impl HousekeeperHandle {
    /// Waits for both loops to exit. Call after cancelling their token.
    pub async fn join(self) {
        for (name, handle) in [("soft-delete", self.soft), ("hard-delete", self.hard)] {
            if let Err(e) = handle.await {
                tracing::error!(sweep = name, error = %e, "Counter housekeeping task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;
    use crate::core::{
        clock::FixedClock,
        counter::{CounterKey, find_counter},
        generator::CodeGenerator,
        rule::create_rule,
    };
    use crate::test_utils::*;
    use sea_orm::{ActiveModelTrait, PaginatorTrait, Set};

    /// Inserts a counter row directly; `seq` keeps identities distinct.
    async fn insert_counter_row(
        db: &DatabaseConnection,
        rule_id: i64,
        seq: u32,
        rule_code: &str,
        deleted_at: Option<NaiveDateTime>,
    ) -> Result<coding_counter::Model> {
        let now = test_clock().now();
        let row = coding_counter::ActiveModel {
            rule_id: Set(rule_id),
            prefix: Set(format!("P{seq}")),
            rule_code: Set(rule_code.to_string()),
            code_separator: Set("/".to_string()),
            digital_code_width: Set(6),
            digital_code: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(deleted_at),
            ..Default::default()
        };
        row.insert(db).await.store_context("inserting test counter")
    }

    async fn live_count(db: &DatabaseConnection) -> Result<u64> {
        Ok(CodingCounter::find()
            .filter(coding_counter::Column::DeletedAt.is_null())
            .count(db)
            .await
            .store_context("counting live counters")?)
    }

    #[tokio::test]
    async fn test_soft_delete_sweeps_stale_counters_in_batches() -> Result<()> {
        let (db, clock, rule) = setup_with_rule().await?;
        let now = clock.now();

        for seq in 1..=12 {
            insert_counter_row(&db, rule.id, seq, "20240320", None).await?;
        }
        let today = insert_counter_row(&db, rule.id, 100, "20240322", None).await?;
        let undated = insert_counter_row(&db, rule.id, 101, "", None).await?;

        assert_eq!(soft_delete_stale_counters(&db, "20240322", now, 10).await?, 10);
        assert_eq!(live_count(&db).await?, 4);
        assert_eq!(soft_delete_stale_counters(&db, "20240322", now, 10).await?, 2);
        assert_eq!(soft_delete_stale_counters(&db, "20240322", now, 10).await?, 0);

        let today = CodingCounter::find_by_id(today.id).one(&db).await.unwrap().unwrap();
        let undated = CodingCounter::find_by_id(undated.id).one(&db).await.unwrap().unwrap();
        assert!(today.deleted_at.is_none());
        assert!(undated.deleted_at.is_none());
        assert_eq!(live_count(&db).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_respects_retention_and_batch() -> Result<()> {
        let (db, clock, rule) = setup_with_rule().await?;
        let now = clock.now();
        let day_ago = now - TimeDelta::hours(25);
        let hour_ago = now - TimeDelta::hours(1);

        for seq in 1..=3 {
            insert_counter_row(&db, rule.id, seq, "20240320", Some(day_ago)).await?;
        }
        let recent = insert_counter_row(&db, rule.id, 10, "20240321", Some(hour_ago)).await?;
        let live = insert_counter_row(&db, rule.id, 11, "20240322", None).await?;

        let cutoff = now - TimeDelta::hours(24);
        assert_eq!(purge_deleted_counters(&db, cutoff, 2).await?, 2);
        assert_eq!(purge_deleted_counters(&db, cutoff, 100).await?, 1);
        assert_eq!(purge_deleted_counters(&db, cutoff, 100).await?, 0);

        assert!(CodingCounter::find_by_id(recent.id).one(&db).await.unwrap().is_some());
        assert!(CodingCounter::find_by_id(live.id).one(&db).await.unwrap().is_some());
        assert_eq!(CodingCounter::find().count(&db).await.unwrap(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_housekeeper_two_stage_cleanup() -> Result<()> {
        let (db, clock, rule) = setup_with_rule().await?;
        let generator = CodeGenerator::new(db.clone(), clock.clone());
        generator.generate(rule.id, 2).await?;
        let yesterday_key = CounterKey::for_rule(&rule, clock.today());

        let housekeeper = Housekeeper::new(db.clone(), clock.clone(), HousekeepingConfig::default());

        // Same day: nothing is stale
        assert_eq!(housekeeper.run_soft_delete_sweep().await?, 0);

        clock.advance(TimeDelta::days(1));
        assert_eq!(housekeeper.run_soft_delete_sweep().await?, 1);
        // Not yet past retention
        assert_eq!(housekeeper.run_hard_delete_sweep().await?, 0);
        assert!(find_counter(&db, &yesterday_key).await?.is_some());

        clock.advance(TimeDelta::hours(24));
        assert_eq!(housekeeper.run_hard_delete_sweep().await?, 1);
        assert!(find_counter(&db, &yesterday_key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_soft_deleted_counter_is_revived_not_restarted() -> Result<()> {
        let (db, clock, rule) = setup_with_rule().await?;
        let generator = CodeGenerator::new(db.clone(), clock.clone());
        generator.generate(rule.id, 2).await?;

        // Housekeeper running slightly ahead of the generator's clock
        let ahead = Arc::new(FixedClock::new(clock.now() + TimeDelta::days(1)));
        let housekeeper = Housekeeper::new(db.clone(), ahead, HousekeepingConfig::default());
        assert_eq!(housekeeper.run_soft_delete_sweep().await?, 1);

        let codes = generator.generate(rule.id, 1).await?;
        assert_eq!(codes, vec!["SJST20240322/000003"]);
        let key = CounterKey::for_rule(&rule, clock.today());
        assert!(find_counter(&db, &key).await?.unwrap().deleted_at.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_housekeeper_loops_sweep_and_stop_on_cancel() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = shared_test_clock();
        let rule = create_rule(&db, clock.as_ref(), sample_rule("Looped")).await?;
        let stale = insert_counter_row(&db, rule.id, 1, "20240301", None).await?;

        let cancel = CancellationToken::new();
        let handle =
            Housekeeper::new(db.clone(), clock.clone(), HousekeepingConfig::default()).start(cancel.clone());

        // The first tick of each loop fires immediately
        let mut swept = false;
        for _ in 0..100 {
            let row = CodingCounter::find_by_id(stale.id).one(&db).await.unwrap().unwrap();
            if row.deleted_at.is_some() {
                swept = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(swept, "stale counter was not soft-deleted");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("housekeeper did not stop after cancellation");
        Ok(())
    }
}
