// ⚖️ Reconciliation Engine - bring granted skills in line with entitlement
//
// For every code the player's lifetime score entitles them to:
//   PASSIVE → exactly one buff (matched by effect code OR name)
//   ACTIVE  → exactly one RANK_SKILL inventory slot (matched by name)
//
// Properties:
//   - Idempotent: a second run on unchanged input reports `changed = false`
//   - Additive: never removes a slot or buff, even if its definition vanished
//   - Charge-preserving: `uses_left` on an existing slot is player state and
//     is never written here

use crate::catalog::{CatalogResolver, Diagnostic, SkillDefinition, SkillKind};
use crate::ladder::RankLadder;
use crate::player::{BuffEntry, InventorySlot, PlayerAggregate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// The reconciled aggregate (same version as the input; the store bumps it)
    pub player: PlayerAggregate,
    pub changed: bool,
    pub tier: Option<String>,
    pub entitled_count: usize,
    pub added_buffs: usize,
    pub added_slots: usize,
    pub refreshed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} ({}): {} entitled, +{} buffs, +{} skills, {} refreshed, {} diagnostics",
            self.player.display_name,
            self.tier.as_deref().unwrap_or("no tier"),
            self.entitled_count,
            self.added_buffs,
            self.added_slots,
            self.refreshed,
            self.diagnostics.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncOutcome {
    Added,
    Refreshed,
    Unchanged,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine<'a> {
    ladder: &'a RankLadder,
    catalog: &'a CatalogResolver<'a>,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(ladder: &'a RankLadder, catalog: &'a CatalogResolver<'a>) -> Self {
        ReconciliationEngine { ladder, catalog }
    }

    /// Compute the reconciled aggregate. Pure: the input is never modified.
    pub fn reconcile(&self, player: &PlayerAggregate, now: DateTime<Utc>) -> ReconciliationReport {
        let entitled = self.ladder.resolve(player.lifetime_high_score);

        // Rarity follows the CURRENT tier, so older skills visually upgrade too
        let tier = self
            .ladder
            .tier_for(player.lifetime_high_score)
            .map(|t| t.display_name.clone());
        let rarity = tier.clone().unwrap_or_default();

        let mut next = player.clone();
        let mut added_buffs = 0;
        let mut added_slots = 0;
        let mut refreshed = 0;
        let mut diagnostics = Vec::new();

        for code in &entitled {
            let definition = match self.catalog.resolve(code) {
                Ok(definition) => definition,
                Err(err) => {
                    warn!(player_id = %player.id, %code, error = %err, "skipping unresolvable skill");
                    diagnostics.push(Diagnostic::UnresolvedSkill { code: code.clone() });
                    continue;
                }
            };

            let outcome = match definition.kind {
                SkillKind::Passive => sync_buff(&mut next.active_buffs, &definition),
                SkillKind::Active => sync_slot(&mut next.inventory, &definition, &rarity, now),
            };

            match (outcome, definition.kind) {
                (SyncOutcome::Added, SkillKind::Passive) => added_buffs += 1,
                (SyncOutcome::Added, SkillKind::Active) => added_slots += 1,
                (SyncOutcome::Refreshed, _) => refreshed += 1,
                (SyncOutcome::Unchanged, _) => {}
            }
        }

        let changed = added_buffs + added_slots + refreshed > 0;
        if changed {
            next.updated_at = now;
            debug!(
                player_id = %player.id,
                added_buffs,
                added_slots,
                refreshed,
                "reconciliation changed player"
            );
        }

        ReconciliationReport {
            player: next,
            changed,
            tier,
            entitled_count: entitled.len(),
            added_buffs,
            added_slots,
            refreshed,
            diagnostics,
        }
    }
}

/// Passive skills: add if missing, otherwise only the image is re-synced.
/// Other buff fields are left as historically granted.
fn sync_buff(buffs: &mut Vec<BuffEntry>, definition: &SkillDefinition) -> SyncOutcome {
    let existing = buffs
        .iter_mut()
        .find(|b| b.effect_code == definition.code || b.name == definition.name);

    match existing {
        None => {
            buffs.push(BuffEntry::rank_passive(definition));
            SyncOutcome::Added
        }
        Some(buff) if buff.image != definition.image => {
            buff.image = definition.image.clone();
            SyncOutcome::Refreshed
        }
        Some(_) => SyncOutcome::Unchanged,
    }
}

/// Active skills: add if missing, otherwise refresh catalog metadata.
/// `uses_left` is never touched here.
fn sync_slot(
    inventory: &mut Vec<InventorySlot>,
    definition: &SkillDefinition,
    rarity: &str,
    now: DateTime<Utc>,
) -> SyncOutcome {
    let existing = inventory
        .iter_mut()
        .find(|slot| slot.is_rank_skill() && slot.name == definition.name);

    let Some(slot) = existing else {
        inventory.push(InventorySlot::rank_skill(definition, rarity, now));
        return SyncOutcome::Added;
    };

    let mut touched = false;
    if slot.image != definition.image {
        slot.image = definition.image.clone();
        touched = true;
    }
    if slot.rarity_label != rarity {
        slot.rarity_label = rarity.to_string();
        touched = true;
    }
    if slot.description != definition.description {
        slot.description = definition.description.clone();
        touched = true;
    }
    if slot.max_uses != definition.max_uses {
        slot.max_uses = definition.max_uses;
        touched = true;
    }

    if touched {
        SyncOutcome::Refreshed
    } else {
        SyncOutcome::Unchanged
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DynamicDefinition, ResetPeriod, StaticCatalog, StaticDefinition};
    use crate::ladder::RankTier;
    use crate::player::SlotCategory;

    fn definition(code: &str, kind: SkillKind) -> StaticDefinition {
        StaticDefinition {
            code: code.to_string(),
            name: format!("Skill {}", code),
            description: format!("Does {}", code),
            image: format!("/uploads/{}.png", code.to_lowercase()),
            kind,
            uses: Some(3),
            reset: Some(ResetPeriod::Quarterly),
        }
    }

    /// X, Y at Silver (1000); A, B, C at Gold (2000). A and X are active.
    fn fixtures() -> (RankLadder, StaticCatalog) {
        let ladder = RankLadder::new(vec![
            RankTier::new("FLOOR", "Floor", 0, &[]),
            RankTier::new("SILVER", "Silver", 1000, &["X", "Y"]),
            RankTier::new("GOLD", "Gold", 2000, &["A", "B", "C"]),
        ])
        .unwrap();

        let catalog = StaticCatalog::from_definitions(vec![
            definition("A", SkillKind::Active),
            definition("B", SkillKind::Passive),
            definition("C", SkillKind::Passive),
            definition("X", SkillKind::Active),
            definition("Y", SkillKind::Passive),
        ]);

        (ladder, catalog)
    }

    fn player_with_score(score: i64) -> PlayerAggregate {
        let mut player = PlayerAggregate::new("Test Student");
        player.adjust_balance(score);
        player
    }

    #[test]
    fn test_gold_player_gets_all_five_grants() {
        let (ladder, statics) = fixtures();
        let resolver = CatalogResolver::new(&statics, Vec::new());
        let engine = ReconciliationEngine::new(&ladder, &resolver);

        let report = engine.reconcile(&player_with_score(2500), Utc::now());

        assert!(report.changed);
        assert_eq!(report.entitled_count, 5);
        assert_eq!(report.added_slots, 2);
        assert_eq!(report.added_buffs, 3);
        assert_eq!(report.player.inventory.len() + report.player.active_buffs.len(), 5);
        assert!(report.diagnostics.is_empty());

        let slot = report.player.rank_skill_slot("Skill A").unwrap();
        assert_eq!(slot.uses_left, 3);
        assert_eq!(slot.max_uses, 3);
        assert_eq!(slot.rarity_label, "Gold");
        assert_eq!(slot.origin, "RANK");
        assert_eq!(slot.category, SlotCategory::RankSkill);

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (ladder, statics) = fixtures();
        let resolver = CatalogResolver::new(&statics, Vec::new());
        let engine = ReconciliationEngine::new(&ladder, &resolver);
        let now = Utc::now();

        let first = engine.reconcile(&player_with_score(2500), now);
        let second = engine.reconcile(&first.player, now);

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.player, second.player);
    }

    #[test]
    fn test_charges_survive_reconciliation() {
        let (ladder, statics) = fixtures();
        let resolver = CatalogResolver::new(&statics, Vec::new());
        let engine = ReconciliationEngine::new(&ladder, &resolver);
        let now = Utc::now();

        let mut player = engine.reconcile(&player_with_score(2500), now).player;
        let slot = player
            .inventory
            .iter_mut()
            .find(|s| s.name == "Skill A")
            .unwrap();
        slot.uses_left = 1;

        let report = engine.reconcile(&player, now);
        assert!(!report.changed);
        assert_eq!(report.player.rank_skill_slot("Skill A").unwrap().uses_left, 1);
    }

    #[test]
    fn test_metadata_refresh_keeps_charges() {
        let (ladder, statics) = fixtures();
        let now = Utc::now();

        let plain = CatalogResolver::new(&statics, Vec::new());
        let mut player = ReconciliationEngine::new(&ladder, &plain)
            .reconcile(&player_with_score(2500), now)
            .player;
        player.inventory[0].uses_left = 1;
        let slot_name = player.inventory[0].name.clone();

        let mut over = DynamicDefinition::named(&slot_name);
        over.image = Some("/uploads/new.png".to_string());
        over.max_uses = Some(5);
        let edited = CatalogResolver::new(&statics, vec![over]);

        let report = ReconciliationEngine::new(&ladder, &edited).reconcile(&player, now);
        let slot = report.player.rank_skill_slot(&slot_name).unwrap();

        assert!(report.changed);
        assert_eq!(report.refreshed, 1);
        assert_eq!(slot.image, "/uploads/new.png");
        assert_eq!(slot.max_uses, 5);
        assert_eq!(slot.uses_left, 1);
    }

    #[test]
    fn test_rarity_follows_current_tier() {
        let (ladder, statics) = fixtures();
        let resolver = CatalogResolver::new(&statics, Vec::new());
        let engine = ReconciliationEngine::new(&ladder, &resolver);
        let now = Utc::now();

        let mut player = engine.reconcile(&player_with_score(1200), now).player;
        assert_eq!(player.rank_skill_slot("Skill X").unwrap().rarity_label, "Silver");

        player.adjust_balance(1000);
        let report = engine.reconcile(&player, now);

        assert_eq!(
            report.player.rank_skill_slot("Skill X").unwrap().rarity_label,
            "Gold"
        );
    }

    #[test]
    fn test_passive_refresh_only_touches_image() {
        let (ladder, statics) = fixtures();
        let mut player = player_with_score(1200);
        player.active_buffs.push(BuffEntry {
            effect_code: "LEGACY_Y".to_string(),
            name: "Skill Y".to_string(),
            image: "/uploads/old.png".to_string(),
            expires_at: None,
            source: "ADMIN".to_string(),
        });

        let resolver = CatalogResolver::new(&statics, Vec::new());
        let report = ReconciliationEngine::new(&ladder, &resolver).reconcile(&player, Utc::now());

        // Matched by name: no duplicate, only the image moved
        let ys: Vec<_> = report
            .player
            .active_buffs
            .iter()
            .filter(|b| b.name == "Skill Y")
            .collect();
        assert_eq!(ys.len(), 1);
        assert_eq!(ys[0].image, "/uploads/y.png");
        assert_eq!(ys[0].effect_code, "LEGACY_Y");
        assert_eq!(ys[0].source, "ADMIN");
    }

    #[test]
    fn test_purchased_item_with_same_name_is_not_a_rank_slot() {
        let (ladder, statics) = fixtures();
        let resolver = CatalogResolver::new(&statics, Vec::new());
        let engine = ReconciliationEngine::new(&ladder, &resolver);
        let now = Utc::now();

        let seed = engine.reconcile(&player_with_score(1200), now).player;
        let mut bought = seed.rank_skill_slot("Skill X").unwrap().clone();
        bought.category = SlotCategory::Consumable;
        bought.origin = "STORE".to_string();

        let mut player = player_with_score(1200);
        player.inventory.push(bought);

        let report = engine.reconcile(&player, now);
        assert_eq!(report.added_slots, 1);
        assert_eq!(report.player.inventory.len(), 2);
    }

    #[test]
    fn test_missing_definition_is_skipped_not_fatal() {
        let (ladder, _) = fixtures();
        // Catalog lost "A" and "Y"
        let statics = StaticCatalog::from_definitions(vec![
            definition("B", SkillKind::Passive),
            definition("C", SkillKind::Passive),
            definition("X", SkillKind::Active),
        ]);
        let resolver = CatalogResolver::new(&statics, Vec::new());

        let report = ReconciliationEngine::new(&ladder, &resolver)
            .reconcile(&player_with_score(2500), Utc::now());

        assert_eq!(report.added_buffs + report.added_slots, 3);
        assert_eq!(report.diagnostics.len(), 2);
        assert!(report
            .diagnostics
            .contains(&Diagnostic::UnresolvedSkill { code: "A".to_string() }));
    }

    #[test]
    fn test_existing_grants_are_never_removed() {
        let (ladder, statics) = fixtures();
        let now = Utc::now();
        let full = CatalogResolver::new(&statics, Vec::new());
        let player = ReconciliationEngine::new(&ladder, &full)
            .reconcile(&player_with_score(2500), now)
            .player;

        // Catalog and ladder both shrink after the fact
        let empty_statics = StaticCatalog::default();
        let empty = CatalogResolver::new(&empty_statics, Vec::new());
        let floor_only = RankLadder::new(vec![RankTier::new("FLOOR", "Floor", 0, &[])]).unwrap();

        let report = ReconciliationEngine::new(&floor_only, &empty).reconcile(&player, now);

        assert!(!report.changed);
        assert_eq!(report.player.inventory.len(), 2);
        assert_eq!(report.player.active_buffs.len(), 3);
    }
}
