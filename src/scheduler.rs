//! Calendar recharge sweep.
//!
//! Every player is processed as its own task. At most `workers` run at once;
//! store calls happen on the blocking pool. A player that fails (missing,
//! corrupt row, conflicts beyond the retry budget) is recorded in the report
//! and the sweep moves on.

use crate::config::EngineConfig;
use crate::db::Event;
use crate::error::{EntitlementError, Result};
use crate::lifecycle::{next_trigger, recharge, RechargeCalendar, RechargeMode};
use crate::repository::{update_with_retry, PlayerRepository};
use chrono::{Datelike, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const ACTOR: &str = "recharge_sweep";

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub month: u32,
    pub processed: usize,
    pub recharged_players: usize,
    pub restored_slots: usize,
    /// (player id, error)
    pub failures: Vec<(String, String)>,
}

impl SweepReport {
    pub fn summary(&self) -> String {
        format!(
            "Recharge sweep (month {}): {} players, {} recharged, {} slots restored, {} failures",
            self.month,
            self.processed,
            self.recharged_players,
            self.restored_slots,
            self.failures.len()
        )
    }
}

/// Recharge every stored player once
pub async fn run_recharge_sweep(
    repo: Arc<dyn PlayerRepository>,
    calendar: RechargeCalendar,
    month: u32,
    mode: RechargeMode,
    workers: usize,
    max_retries: u32,
) -> Result<SweepReport> {
    let ids = {
        let repo = Arc::clone(&repo);
        tokio::task::spawn_blocking(move || repo.list_player_ids())
            .await
            .map_err(EntitlementError::WorkerJoin)??
    };

    info!(players = ids.len(), month, ?mode, workers, "starting recharge sweep");

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let calendar = Arc::new(calendar);
    let mut tasks = JoinSet::new();

    for player_id in ids {
        let repo = Arc::clone(&repo);
        let semaphore = Arc::clone(&semaphore);
        let calendar = Arc::clone(&calendar);

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (player_id, Err("sweep pool closed".to_string()));
            };

            let id = player_id.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                recharge_one(repo.as_ref(), &id, &calendar, month, mode, max_retries)
            })
            .await;

            match outcome {
                Ok(Ok(restored)) => (player_id, Ok(restored)),
                Ok(Err(err)) => (player_id, Err(err.to_string())),
                Err(join) => (player_id, Err(join.to_string())),
            }
        });
    }

    let mut report = SweepReport {
        month,
        ..Default::default()
    };

    while let Some(joined) = tasks.join_next().await {
        report.processed += 1;
        match joined {
            Ok((_, Ok(0))) => {}
            Ok((_, Ok(restored))) => {
                report.recharged_players += 1;
                report.restored_slots += restored;
            }
            Ok((player_id, Err(err))) => {
                warn!(%player_id, error = %err, "recharge failed for player");
                report.failures.push((player_id, err));
            }
            Err(join) => {
                error!(error = %join, "recharge task aborted");
                report.failures.push(("<unknown>".to_string(), join.to_string()));
            }
        }
    }

    info!("{}", report.summary());
    Ok(report)
}

/// Recharge a single player; returns how many slots were restored
fn recharge_one(
    repo: &dyn PlayerRepository,
    player_id: &str,
    calendar: &RechargeCalendar,
    month: u32,
    mode: RechargeMode,
    max_retries: u32,
) -> Result<usize> {
    let (stored, restored) = update_with_retry(repo, player_id, max_retries, |current| {
        let outcome = recharge(current, calendar, month, mode);
        let restored = outcome.restored_slots;
        let next = outcome.changed().then_some(outcome.player);
        Ok((next, restored))
    })?;

    if restored > 0 {
        // The slots are already restored; a lost audit row must not mark the
        // player failed
        let event = Event::for_player(
            "skills_recharged",
            player_id,
            json!({
                "month": month,
                "forced": mode == RechargeMode::Force,
                "restored_slots": restored,
                "version": stored.version,
            }),
            ACTOR,
        );
        if let Err(err) = repo.record_event(&event) {
            warn!(player_id, error = %err, "recharge audit event not recorded");
        }
    }

    Ok(restored)
}

/// Sleep until each first-of-month and run the sweep, until Ctrl-C
pub async fn run_schedule(repo: Arc<dyn PlayerRepository>, config: EngineConfig) -> Result<()> {
    loop {
        let now = Utc::now();
        let trigger = next_trigger(now);
        let wait = (trigger - now).to_std().unwrap_or_default();
        info!(next_run = %trigger, "recharge sweep scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("scheduler stopped");
                return Ok(());
            }
        }

        let report = run_recharge_sweep(
            Arc::clone(&repo),
            config.recharge_calendar(),
            trigger.month(),
            RechargeMode::Calendar,
            config.sweep_workers,
            config.max_write_retries,
        )
        .await?;

        if !report.failures.is_empty() {
            warn!(failures = report.failures.len(), "sweep finished with failures");
        }
    }
}
