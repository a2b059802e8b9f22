// Rank Entitlement Engine - Core Library
// Exposes all modules for use in the CLI, embedding services and tests

pub mod bonus;          // Ranked multiplier table + reward cap
pub mod catalog;        // Static + operator skill definitions
pub mod config;         // Engine configuration (defaults → file → env)
pub mod db;             // SQLite store + audit trail
pub mod error;          // Typed errors
pub mod ladder;         // Rank tiers and entitlement resolution
pub mod lifecycle;      // Lazy expiry + calendar recharge
pub mod player;         // Player aggregate
pub mod reconciliation; // Entitlement → buffs/skills
pub mod repository;     // Store contract + in-memory store
pub mod scheduler;      // Concurrent recharge sweep
pub mod service;        // Entry points for other systems

// Re-export commonly used types
pub use bonus::{Blessing, BonusBreakdown, BonusTable, MultiplierRule};
pub use catalog::{
    CatalogResolver, Diagnostic, DynamicDefinition, OverrideSet, ResetPeriod, SkillDefinition,
    SkillKind, StaticCatalog, StaticDefinition,
};
pub use config::EngineConfig;
pub use db::{setup_database, Event, SqliteRepository};
pub use error::{CatalogError, EntitlementError, LadderError, Result, StoreError};
pub use ladder::{RankLadder, RankProgress, RankTier};
pub use lifecycle::{
    next_trigger, prepare_for_persist, recharge, RechargeCalendar, RechargeMode, RechargeOutcome,
};
pub use player::{BuffEntry, InventorySlot, PlayerAggregate, SlotCategory, RANK_ORIGIN};
pub use reconciliation::{ReconciliationEngine, ReconciliationReport};
pub use repository::{update_with_retry, MemoryRepository, PlayerRepository};
pub use scheduler::{run_recharge_sweep, run_schedule, SweepReport};
pub use service::{BulkGrantReport, EntitlementService, RewardOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
