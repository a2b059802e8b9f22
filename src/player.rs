// 🎒 Player Aggregate - the one entity every component reads or writes
//
// Identity: `id` (UUID, never changes)
// Value: score, balance, inventory, buffs (replaced wholesale on every write)
// Version: optimistic concurrency token, bumped by the store on each save
//
// Inventory and buffs are plain value lists. Components return a NEW
// aggregate instead of patching nested entries in place; the store persists
// it atomically against the version it was read at.

use crate::catalog::{ResetPeriod, SkillDefinition, SkillKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin/source marker for everything granted by rank
pub const RANK_ORIGIN: &str = "RANK";

// ============================================================================
// INVENTORY SLOT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotCategory {
    /// Bought in the store, used up
    Consumable,
    /// Custom or permanent item
    Permanent,
    /// Granted by rank reconciliation (the marker reconciliation matches on)
    RankSkill,
    Ticket,
    Roulette,
    Buff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySlot {
    pub slot_id: String,
    #[serde(default)]
    pub skill_code: Option<String>,
    pub name: String,
    pub description: String,
    pub image: String,
    pub rarity_label: String,
    pub category: SlotCategory,
    pub kind: SkillKind,
    pub max_uses: u32,
    pub uses_left: u32,
    pub reset_period: ResetPeriod,
    pub quantity: u32,
    pub acquired_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub origin: String,
}

impl InventorySlot {
    /// Fresh rank grant: full charges, one unit
    pub fn rank_skill(definition: &SkillDefinition, rarity_label: &str, now: DateTime<Utc>) -> Self {
        InventorySlot {
            slot_id: uuid::Uuid::new_v4().to_string(),
            skill_code: Some(definition.code.clone()),
            name: definition.name.clone(),
            description: definition.description.clone(),
            image: definition.image.clone(),
            rarity_label: rarity_label.to_string(),
            category: SlotCategory::RankSkill,
            kind: SkillKind::Active,
            max_uses: definition.max_uses,
            uses_left: definition.max_uses,
            reset_period: definition.reset_period,
            quantity: 1,
            acquired_at: now,
            expires_at: None,
            last_used_at: None,
            origin: RANK_ORIGIN.to_string(),
        }
    }

    pub fn is_rank_skill(&self) -> bool {
        self.category == SlotCategory::RankSkill
    }

    pub fn needs_recharge(&self) -> bool {
        self.uses_left < self.max_uses
    }
}

// ============================================================================
// BUFF ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffEntry {
    pub effect_code: String,
    pub name: String,
    pub image: String,
    /// None = eternal
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub source: String,
}

impl BuffEntry {
    pub fn rank_passive(definition: &SkillDefinition) -> Self {
        BuffEntry {
            effect_code: definition.code.clone(),
            name: definition.name.clone(),
            image: definition.image.clone(),
            expires_at: None,
            source: RANK_ORIGIN.to_string(),
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |until| until > now)
    }
}

// ============================================================================
// PLAYER AGGREGATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAggregate {
    pub id: String,
    pub display_name: String,

    /// High-water mark of `current_balance`; drives tier membership
    pub lifetime_high_score: i64,

    /// Spendable amount; may rise and fall
    pub current_balance: i64,

    /// Honorary roles (e.g. blessings that add to reward multipliers)
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub inventory: Vec<InventorySlot>,

    #[serde(default)]
    pub active_buffs: Vec<BuffEntry>,

    /// Optimistic concurrency token
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlayerAggregate {
    /// Account creation: zero score, zero balance, nothing granted
    pub fn new(display_name: &str) -> Self {
        let now = Utc::now();
        PlayerAggregate {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            lifetime_high_score: 0,
            current_balance: 0,
            roles: Vec::new(),
            inventory: Vec::new(),
            active_buffs: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a balance change and raise the lifetime score if it was exceeded.
    /// The lifetime score never goes down, even when the balance does.
    pub fn adjust_balance(&mut self, delta: i64) {
        self.current_balance = self.current_balance.saturating_add(delta);
        self.raise_lifetime_high_score();
    }

    pub fn raise_lifetime_high_score(&mut self) {
        if self.current_balance > self.lifetime_high_score {
            self.lifetime_high_score = self.current_balance;
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn grant_role(&mut self, role: &str) {
        if !self.has_role(role) {
            self.roles.push(role.to_string());
        }
    }

    /// Buffs still in effect at `now`
    pub fn buffs_active_at(&self, now: DateTime<Utc>) -> impl Iterator<Item = &BuffEntry> {
        self.active_buffs.iter().filter(move |b| b.is_active_at(now))
    }

    pub fn rank_skill_slot(&self, name: &str) -> Option<&InventorySlot> {
        self.inventory
            .iter()
            .find(|slot| slot.is_rank_skill() && slot.name == name)
    }

    pub fn find_buff(&self, effect_code: &str, name: &str) -> Option<&BuffEntry> {
        self.active_buffs
            .iter()
            .find(|b| b.effect_code == effect_code || b.name == name)
    }
}

// ============================================================================
// TESTS
// ============================================================================
