// 🏅 Entitlement Service - the entry points other systems call
//
//   refresh_player   → profile load: reconcile and persist if anything changed
//   preview_reward   → what a grant WOULD pay, nothing written
//   grant_reward     → bonus-aware grant, then re-reconcile for a possible
//                      tier-up, persisted in one versioned write
//
// Every write goes through `update_with_retry`, so a concurrent sweep or a
// second grant never gets overwritten. Each persisted change leaves an audit
// event; the event is written after the player, and losing it is logged but
// never turns a committed change into an error.

use crate::bonus::{BonusBreakdown, BonusTable};
use crate::catalog::{CatalogResolver, Diagnostic, StaticCatalog};
use crate::config::EngineConfig;
use crate::db::Event;
use crate::error::Result;
use crate::ladder::{RankLadder, RankProgress};
use crate::player::PlayerAggregate;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::repository::{update_with_retry, PlayerRepository};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tracing::{info, warn};

const ACTOR: &str = "entitlement_service";

/// Result of a single reward grant
#[derive(Debug, Clone, Serialize)]
pub struct RewardOutcome {
    pub player: PlayerAggregate,
    pub breakdown: BonusBreakdown,
    /// Skills newly granted because the reward crossed a tier threshold
    pub added_buffs: usize,
    pub added_slots: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkGrantReport {
    pub granted: Vec<(String, BonusBreakdown)>,
    pub failures: Vec<(String, String)>,
}

impl BulkGrantReport {
    pub fn total_awarded(&self) -> i64 {
        self.granted.iter().map(|(_, b)| b.awarded).sum()
    }
}

pub struct EntitlementService {
    repo: Arc<dyn PlayerRepository>,
    ladder: RankLadder,
    statics: StaticCatalog,
    bonus: BonusTable,
    config: EngineConfig,
}

impl EntitlementService {
    pub fn new(
        repo: Arc<dyn PlayerRepository>,
        ladder: RankLadder,
        statics: StaticCatalog,
        bonus: BonusTable,
        config: EngineConfig,
    ) -> Self {
        EntitlementService {
            repo,
            ladder,
            statics,
            bonus,
            config,
        }
    }

    /// Default ladder, plus catalog and bonus table from the configured files
    /// (built-in ones when unset)
    pub fn from_config(repo: Arc<dyn PlayerRepository>, config: EngineConfig) -> anyhow::Result<Self> {
        let statics = match &config.catalog_path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read skill catalog: {:?}", path))?;
                StaticCatalog::from_json(&content).context("Failed to parse skill catalog")?
            }
            None => StaticCatalog::builtin().context("Built-in skill catalog is invalid")?,
        };

        let bonus = match &config.bonus_table_path {
            Some(path) => BonusTable::from_file(path)?,
            None => BonusTable::default(),
        };

        let service = Self::new(repo, RankLadder::default(), statics, bonus, config);
        service.log_catalog_findings();
        Ok(service)
    }

    /// One warning per unusable operator override, at load time
    pub fn log_catalog_findings(&self) {
        match self.check_catalog() {
            Ok(findings) => {
                for diagnostic in findings {
                    warn!(%diagnostic, "catalog override not applied");
                }
            }
            Err(err) => warn!(error = %err, "could not read operator overrides"),
        }
    }

    pub fn repository(&self) -> &Arc<dyn PlayerRepository> {
        &self.repo
    }

    pub fn ladder(&self) -> &RankLadder {
        &self.ladder
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Operator overrides are re-read on every call
    fn resolver(&self) -> Result<CatalogResolver<'_>> {
        let overrides = self.repo.dynamic_definitions()?;
        Ok(CatalogResolver::from_overrides(&self.statics, overrides))
    }

    fn audit(&self, event: Event) {
        if let Err(err) = self.repo.record_event(&event) {
            warn!(
                event_type = %event.event_type,
                entity_id = %event.entity_id,
                error = %err,
                "audit event not recorded"
            );
        }
    }

    pub fn create_player(&self, display_name: &str) -> Result<PlayerAggregate> {
        let player = PlayerAggregate::new(display_name);
        self.repo.insert_player(&player)?;
        self.audit(Event::for_player(
            "player_created",
            &player.id,
            json!({ "display_name": display_name }),
            ACTOR,
        ));
        info!(player_id = %player.id, display_name, "created player");
        Ok(player)
    }

    pub fn load_player(&self, player_id: &str) -> Result<PlayerAggregate> {
        Ok(self.repo.load_player(player_id)?)
    }

    pub fn progress(&self, player: &PlayerAggregate) -> Option<RankProgress> {
        self.ladder.progress(player.lifetime_high_score)
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Bring the stored player in line with their rank. Writes only when the
    /// reconciliation changed something.
    pub fn refresh_player(&self, player_id: &str) -> Result<ReconciliationReport> {
        let resolver = self.resolver()?;
        let engine = ReconciliationEngine::new(&self.ladder, &resolver);

        let (stored, mut report) = update_with_retry(
            self.repo.as_ref(),
            player_id,
            self.config.max_write_retries,
            |current| {
                let report = engine.reconcile(current, Utc::now());
                let next = report.changed.then(|| report.player.clone());
                Ok((next, report))
            },
        )?;

        if report.changed {
            self.audit(Event::for_player(
                "player_reconciled",
                player_id,
                json!({
                    "tier": report.tier,
                    "added_buffs": report.added_buffs,
                    "added_slots": report.added_slots,
                    "refreshed": report.refreshed,
                    "version": stored.version,
                }),
                ACTOR,
            ));
            info!(player_id, version = stored.version, "{}", report.summary());
        }

        report.player = stored;
        Ok(report)
    }

    // ========================================================================
    // REWARDS
    // ========================================================================

    /// What `grant_reward` would pay right now. Reconciles in memory first so
    /// a rank-granted multiplier is counted even before the next profile load.
    pub fn preview_reward(&self, player_id: &str, base: i64) -> Result<BonusBreakdown> {
        let resolver = self.resolver()?;
        let engine = ReconciliationEngine::new(&self.ladder, &resolver);
        let now = Utc::now();

        let player = self.repo.load_player(player_id)?;
        let report = engine.reconcile(&player, now);
        Ok(self.bonus.apply(base, &report.player, self.config.reward_cap, now))
    }

    pub fn grant_reward(&self, player_id: &str, base: i64, reason: &str) -> Result<RewardOutcome> {
        let resolver = self.resolver()?;
        let engine = ReconciliationEngine::new(&self.ladder, &resolver);
        let cap = self.config.reward_cap;

        let (stored, (breakdown, added_buffs, added_slots)) = update_with_retry(
            self.repo.as_ref(),
            player_id,
            self.config.max_write_retries,
            |current| {
                let now = Utc::now();
                let before = engine.reconcile(current, now);
                let breakdown = self.bonus.apply(base, &before.player, cap, now);

                let mut credited = before.player;
                credited.adjust_balance(breakdown.awarded);

                // The reward may have crossed a tier threshold
                let after = engine.reconcile(&credited, now);
                let added = (
                    before.added_buffs + after.added_buffs,
                    before.added_slots + after.added_slots,
                );
                Ok((Some(after.player), (breakdown, added.0, added.1)))
            },
        )?;

        self.audit(Event::for_player(
            "reward_granted",
            player_id,
            json!({
                "reason": reason,
                "breakdown": breakdown,
                "balance": stored.current_balance,
                "lifetime_high_score": stored.lifetime_high_score,
                "version": stored.version,
            }),
            ACTOR,
        ));

        info!(
            player_id,
            base,
            awarded = breakdown.awarded,
            balance = stored.current_balance,
            "granted reward{}: {}",
            breakdown.tag(),
            reason
        );

        Ok(RewardOutcome {
            player: stored,
            breakdown,
            added_buffs,
            added_slots,
        })
    }

    /// Grant the same base amount to many players; one failure does not stop
    /// the rest
    pub fn bulk_grant(&self, player_ids: &[String], base: i64, reason: &str) -> BulkGrantReport {
        let mut report = BulkGrantReport::default();
        for id in player_ids {
            match self.grant_reward(id, base, reason) {
                Ok(outcome) => report.granted.push((id.clone(), outcome.breakdown)),
                Err(err) => {
                    warn!(player_id = %id, error = %err, "bulk grant failed for player");
                    report.failures.push((id.clone(), err.to_string()));
                }
            }
        }
        report
    }

    pub fn bulk_preview(&self, player_ids: &[String], base: i64) -> BulkGrantReport {
        let mut report = BulkGrantReport::default();
        for id in player_ids {
            match self.preview_reward(id, base) {
                Ok(breakdown) => report.granted.push((id.clone(), breakdown)),
                Err(err) => report.failures.push((id.clone(), err.to_string())),
            }
        }
        report
    }

    // ========================================================================
    // CATALOG
    // ========================================================================

    /// Operator overrides that join to no built-in skill
    pub fn check_catalog(&self) -> Result<Vec<Diagnostic>> {
        Ok(self.resolver()?.validate())
    }
}
