// ⏳ Lifecycle - lazy expiry + calendar recharge
//
// Two time-driven behaviors that mutate the aggregate outside reconciliation:
//
// 1. Lazy expiry (ACTIVE → EXPIRED → removed): applied every time a player is
//    persisted. Buffs with `expires_at` in the past are dropped; `None` never
//    expires.
// 2. Calendar recharge: on the first of each month, ACTIVE skills get their
//    charges back. MONTHLY always, QUARTERLY only in designated months,
//    NEVER not at all.

use crate::catalog::{ResetPeriod, SkillKind};
use crate::player::{InventorySlot, PlayerAggregate};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// LAZY EXPIRY
// ============================================================================

/// Normalize an aggregate right before it is written.
///
/// Drops expired buffs and lifts the lifetime score to the balance if the
/// balance got ahead of it. Returns the number of buffs removed.
pub fn prepare_for_persist(player: &PlayerAggregate, now: DateTime<Utc>) -> (PlayerAggregate, usize) {
    let mut next = player.clone();

    let before = next.active_buffs.len();
    next.active_buffs.retain(|buff| buff.is_active_at(now));
    let removed = before - next.active_buffs.len();

    next.raise_lifetime_high_score();
    (next, removed)
}

// ============================================================================
// RECHARGE CALENDAR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeCalendar {
    /// Months (1 = January) in which QUARTERLY skills recharge
    pub quarterly_months: Vec<u32>,
}

impl RechargeCalendar {
    pub fn new(quarterly_months: Vec<u32>) -> Self {
        RechargeCalendar { quarterly_months }
    }

    pub fn is_quarterly_month(&self, month: u32) -> bool {
        self.quarterly_months.contains(&month)
    }

    /// Does a slot with this period recharge when the sweep runs in `month`?
    pub fn restores(&self, period: ResetPeriod, month: u32) -> bool {
        match period {
            ResetPeriod::Monthly => true,
            ResetPeriod::Quarterly => self.is_quarterly_month(month),
            ResetPeriod::Never => false,
        }
    }
}

impl Default for RechargeCalendar {
    /// School calendar: May and August
    fn default() -> Self {
        RechargeCalendar::new(vec![5, 8])
    }
}

// ============================================================================
// RECHARGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RechargeMode {
    /// Follow each slot's reset period and the calendar
    Calendar,
    /// Refill every active rank skill regardless of period or month
    Force,
}

#[derive(Debug, Clone)]
pub struct RechargeOutcome {
    pub player: PlayerAggregate,
    pub restored_slots: usize,
}

impl RechargeOutcome {
    pub fn changed(&self) -> bool {
        self.restored_slots > 0
    }
}

/// Restore charges for one player. Slots already full are left alone, so a
/// second run in the same month restores nothing.
pub fn recharge(
    player: &PlayerAggregate,
    calendar: &RechargeCalendar,
    month: u32,
    mode: RechargeMode,
) -> RechargeOutcome {
    let mut next = player.clone();
    let mut restored_slots = 0;

    for slot in next.inventory.iter_mut() {
        if slot.kind != SkillKind::Active || !slot.needs_recharge() {
            continue;
        }

        let eligible = match mode {
            RechargeMode::Calendar => calendar.restores(slot.reset_period, month),
            RechargeMode::Force => slot.is_rank_skill(),
        };

        if eligible {
            refill(slot);
            restored_slots += 1;
        }
    }

    RechargeOutcome {
        player: next,
        restored_slots,
    }
}

fn refill(slot: &mut InventorySlot) {
    slot.uses_left = slot.max_uses;
    slot.last_used_at = None;
}

// ============================================================================
// TRIGGER
// ============================================================================

/// First day of a month, 00:00 UTC
pub fn is_trigger_day(date: NaiveDate) -> bool {
    date.day() == 1
}

/// Next first-of-month 00:00 UTC strictly after `after`
pub fn next_trigger(after: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if after.month() == 12 {
        (after.year() + 1, 1)
    } else {
        (after.year(), after.month() + 1)
    };

    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(after)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SkillDefinition, SkillKind};
    use crate::player::{BuffEntry, SlotCategory};
    use chrono::Duration;

    fn slot(name: &str, period: ResetPeriod, uses_left: u32) -> InventorySlot {
        let definition = SkillDefinition {
            code: name.to_uppercase(),
            name: name.to_string(),
            description: String::new(),
            image: String::new(),
            kind: SkillKind::Active,
            max_uses: 3,
            reset_period: period,
        };
        let mut slot = InventorySlot::rank_skill(&definition, "Gold", Utc::now());
        slot.uses_left = uses_left;
        slot.last_used_at = Some(Utc::now());
        slot
    }

    fn player_with(slots: Vec<InventorySlot>) -> PlayerAggregate {
        let mut player = PlayerAggregate::new("Sweep Tester");
        player.inventory = slots;
        player
    }

    #[test]
    fn test_quarterly_only_in_designated_months() {
        let calendar = RechargeCalendar::default();
        let player = player_with(vec![slot("quarterly", ResetPeriod::Quarterly, 0)]);

        let march = recharge(&player, &calendar, 3, RechargeMode::Calendar);
        assert!(!march.changed());
        assert_eq!(march.player.inventory[0].uses_left, 0);

        let may = recharge(&player, &calendar, 5, RechargeMode::Calendar);
        assert!(may.changed());
        assert_eq!(may.player.inventory[0].uses_left, 3);
        assert!(may.player.inventory[0].last_used_at.is_none());
    }

    #[test]
    fn test_monthly_always_and_never_untouched() {
        let calendar = RechargeCalendar::default();
        let player = player_with(vec![
            slot("monthly", ResetPeriod::Monthly, 1),
            slot("never", ResetPeriod::Never, 0),
        ]);

        for month in 1..=12 {
            let outcome = recharge(&player, &calendar, month, RechargeMode::Calendar);
            assert_eq!(outcome.restored_slots, 1, "month {}", month);
            assert_eq!(outcome.player.inventory[0].uses_left, 3);
            assert_eq!(outcome.player.inventory[1].uses_left, 0);
        }
    }

    #[test]
    fn test_recharge_is_idempotent() {
        let calendar = RechargeCalendar::default();
        let player = player_with(vec![slot("monthly", ResetPeriod::Monthly, 0)]);

        let first = recharge(&player, &calendar, 8, RechargeMode::Calendar);
        let second = recharge(&first.player, &calendar, 8, RechargeMode::Calendar);

        assert!(first.changed());
        assert!(!second.changed());
    }

    #[test]
    fn test_force_refills_rank_skills_only() {
        let calendar = RechargeCalendar::default();
        let mut bought = slot("bought", ResetPeriod::Never, 0);
        bought.category = SlotCategory::Consumable;
        let player = player_with(vec![slot("never", ResetPeriod::Never, 0), bought]);

        let outcome = recharge(&player, &calendar, 2, RechargeMode::Force);
        assert_eq!(outcome.restored_slots, 1);
        assert_eq!(outcome.player.inventory[0].uses_left, 3);
        assert_eq!(outcome.player.inventory[1].uses_left, 0);
    }

    #[test]
    fn test_prepare_for_persist_drops_expired_buffs() {
        let now = Utc::now();
        let mut player = PlayerAggregate::new("Expiry Tester");
        player.active_buffs = vec![
            BuffEntry {
                effect_code: "OLD".to_string(),
                name: "Old".to_string(),
                image: String::new(),
                expires_at: Some(now - Duration::seconds(1)),
                source: "STORE".to_string(),
            },
            BuffEntry {
                effect_code: "FOREVER".to_string(),
                name: "Forever".to_string(),
                image: String::new(),
                expires_at: None,
                source: "RANK".to_string(),
            },
        ];
        player.current_balance = 800;

        let (persisted, removed) = prepare_for_persist(&player, now);

        assert_eq!(removed, 1);
        assert_eq!(persisted.active_buffs.len(), 1);
        assert_eq!(persisted.active_buffs[0].effect_code, "FOREVER");
        assert_eq!(persisted.lifetime_high_score, 800);
    }

    #[test]
    fn test_next_trigger() {
        let mid_may = Utc.with_ymd_and_hms(2026, 5, 17, 13, 0, 0).unwrap();
        assert_eq!(
            next_trigger(mid_may),
            Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
        );

        let december = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            next_trigger(december),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()
        );

        // Exactly on a trigger → the following month
        let on_trigger = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        assert_eq!(next_trigger(on_trigger).month(), 9);

        assert!(is_trigger_day(NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()));
        assert!(!is_trigger_day(NaiveDate::from_ymd_opt(2026, 8, 2).unwrap()));
    }
}
