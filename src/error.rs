// 🚨 Error Types - typed failures for the entitlement core
//
// Library code returns these; the CLI wraps them in anyhow with context.
// Nothing here is process-fatal: every variant is recoverable by the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EntitlementError>;

// ============================================================================
// RANK LADDER
// ============================================================================

#[derive(Debug, Error)]
pub enum LadderError {
    #[error("rank ladder must start with a floor tier at threshold 0 (found {found})")]
    MissingFloor { found: i64 },

    #[error("tier {tier:?} threshold {threshold} is not above previous threshold {previous}")]
    NonIncreasing {
        tier: String,
        threshold: i64,
        previous: i64,
    },

    #[error("duplicate tier id {0:?}")]
    DuplicateTier(String),
}

// ============================================================================
// DEFINITION CATALOG
// ============================================================================

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no static skill definition for code {code:?}")]
    NotFound { code: String },

    #[error("failed to parse static skill catalog")]
    Parse(#[source] serde_json::Error),

    #[error("unknown catalog value {0:?}")]
    UnknownValue(String),
}

// ============================================================================
// PLAYER STORE
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("player {0} not found")]
    PlayerNotFound(String),

    #[error("version conflict for player {id}: expected {expected}, stored {actual}")]
    VersionConflict { id: String, expected: i64, actual: i64 },

    #[error("player {0} already exists")]
    DuplicatePlayer(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize stored document")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid value {value:?} in column {column}")]
    InvalidColumn { column: &'static str, value: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

// ============================================================================
// TOP-LEVEL
// ============================================================================

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Ladder(#[from] LadderError),

    #[error("gave up writing player {player_id} after {attempts} conflicting attempts")]
    RetriesExhausted { player_id: String, attempts: u32 },

    #[error("sweep worker join failed")]
    WorkerJoin(#[source] tokio::task::JoinError),
}
