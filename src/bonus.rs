// ✖️ Reward Bonus - ranked multiplier table + absolute cap
//
// Multipliers are data, not an if/else chain: each rule names an effect code,
// a multiplier (in percent) and a rank. The highest-ranked rule whose effect
// the player currently holds is the ONLY one applied; classes never stack.
// Blessings (role-based) add a flat percentage on top.
//
//   raw     = floor(base * pct / 100)
//   awarded = min(raw, cap)        only when pct > 100
//
// Preview and grant must both go through `BonusTable::apply`.

use crate::player::PlayerAggregate;
use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const BASE_PCT: u32 = 100;

// ============================================================================
// RULES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplierRule {
    /// Buff effect code this rule reacts to
    pub effect_code: String,

    /// 300 = 3x
    pub multiplier_pct: u32,

    /// Higher rank wins when several effects are held
    pub rank: u32,

    #[serde(default)]
    pub description: Option<String>,
}

impl MultiplierRule {
    pub fn new(effect_code: &str, multiplier_pct: u32, rank: u32) -> Self {
        MultiplierRule {
            effect_code: effect_code.to_string(),
            multiplier_pct,
            rank,
            description: None,
        }
    }
}

/// Flat bonus for holders of a role, added to whichever multiplier applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blessing {
    pub role: String,
    pub bonus_pct: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BonusTableFile {
    #[serde(default)]
    rules: Vec<MultiplierRule>,
    #[serde(default)]
    blessings: Vec<Blessing>,
}

// ============================================================================
// BONUS BREAKDOWN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BonusBreakdown {
    pub base: i64,
    pub multiplier_pct: u32,
    /// Effect that selected the multiplier, if any
    pub effect_code: Option<String>,
    pub raw: i64,
    pub awarded: i64,
    pub capped: bool,
}

impl BonusBreakdown {
    fn unchanged(base: i64) -> Self {
        BonusBreakdown {
            base,
            multiplier_pct: BASE_PCT,
            effect_code: None,
            raw: base,
            awarded: base,
            capped: false,
        }
    }

    pub fn is_boosted(&self) -> bool {
        self.multiplier_pct > BASE_PCT
    }

    /// Log tag, e.g. " [bonus 3x]" or " [bonus 2.5x, capped]"
    pub fn tag(&self) -> String {
        if !self.is_boosted() {
            return String::new();
        }
        let factor = self.multiplier_pct as f64 / 100.0;
        if self.capped {
            format!(" [bonus {}x, capped]", factor)
        } else {
            format!(" [bonus {}x]", factor)
        }
    }
}

// ============================================================================
// BONUS TABLE
// ============================================================================

#[derive(Debug, Clone)]
pub struct BonusTable {
    /// Sorted by rank, highest first
    rules: Vec<MultiplierRule>,
    blessings: Vec<Blessing>,
}

impl BonusTable {
    pub fn new(mut rules: Vec<MultiplierRule>, blessings: Vec<Blessing>) -> Self {
        rules.sort_by(|a, b| b.rank.cmp(&a.rank));
        BonusTable { rules, blessings }
    }

    /// Load rules and blessings from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read bonus table: {:?}", path.as_ref()))?;

        let file: BonusTableFile =
            serde_json::from_str(&content).context("Failed to parse bonus table JSON")?;

        Ok(BonusTable::new(file.rules, file.blessings))
    }

    pub fn rules(&self) -> &[MultiplierRule] {
        &self.rules
    }

    /// The single best multiplier rule the player currently holds
    pub fn best_rule(&self, player: &PlayerAggregate, now: DateTime<Utc>) -> Option<&MultiplierRule> {
        self.rules.iter().find(|rule| {
            player
                .buffs_active_at(now)
                .any(|buff| buff.effect_code == rule.effect_code)
        })
    }

    /// Final amount for a reward of `base`, with the full breakdown
    pub fn apply(
        &self,
        base: i64,
        player: &PlayerAggregate,
        cap: i64,
        now: DateTime<Utc>,
    ) -> BonusBreakdown {
        // Fines and zero grants are never multiplied
        if base <= 0 {
            return BonusBreakdown::unchanged(base);
        }

        let rule = self.best_rule(player, now);
        let blessing_pct: u32 = self
            .blessings
            .iter()
            .filter(|b| player.has_role(&b.role))
            .map(|b| b.bonus_pct)
            .sum();
        let multiplier_pct = rule.map_or(BASE_PCT, |r| r.multiplier_pct) + blessing_pct;

        // The cap bounds buffed rewards only
        if multiplier_pct <= BASE_PCT {
            return BonusBreakdown::unchanged(base);
        }

        let raw = base.saturating_mul(i64::from(multiplier_pct)) / i64::from(BASE_PCT);
        let awarded = raw.min(cap);

        BonusBreakdown {
            base,
            multiplier_pct,
            effect_code: rule.map(|r| r.effect_code.clone()),
            raw,
            awarded,
            capped: awarded < raw,
        }
    }

    /// Shortcut when only the number is needed
    pub fn award(&self, base: i64, player: &PlayerAggregate, cap: i64, now: DateTime<Utc>) -> i64 {
        self.apply(base, player, cap, now).awarded
    }
}

impl Default for BonusTable {
    /// Tripler beats doubler; the merlin blessing adds half a multiplier
    fn default() -> Self {
        BonusTable::new(
            vec![
                MultiplierRule::new("TRIPLICADOR", 300, 30),
                MultiplierRule::new("DOBRADOR", 200, 20),
                MultiplierRule::new("DUPLICADOR", 200, 20),
            ],
            vec![Blessing {
                role: "merlin_blessing".to_string(),
                bonus_pct: 50,
            }],
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
