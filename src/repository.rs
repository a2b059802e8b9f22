//! Store contracts for the player aggregate, operator catalog and audit trail.
//!
//! Every write of a player goes through `save_player`, which:
//! - rejects the write if the stored version moved since the caller read it
//! - applies lazy expiry and lifetime-score normalization
//! - bumps the version
//!
//! Callers that lose a race get `StoreError::VersionConflict` and must reload
//! and recompute; nothing is ever silently overwritten.

use crate::catalog::{DynamicDefinition, OverrideSet};
use crate::db::Event;
use crate::error::{EntitlementError, Result, StoreError};
use crate::lifecycle::prepare_for_persist;
use crate::player::PlayerAggregate;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait PlayerRepository: Send + Sync {
    /// Store a brand new aggregate
    fn insert_player(&self, player: &PlayerAggregate) -> StoreResult<()>;

    fn load_player(&self, id: &str) -> StoreResult<PlayerAggregate>;

    /// Optimistic write: succeeds only if the stored version equals
    /// `player.version`. Returns what was actually persisted.
    fn save_player(&self, player: &PlayerAggregate) -> StoreResult<PlayerAggregate>;

    fn list_player_ids(&self) -> StoreResult<Vec<String>>;

    /// Operator overrides, keyed by skill name. A row that cannot be decoded
    /// is reported in `OverrideSet::invalid` instead of failing the read.
    fn dynamic_definitions(&self) -> StoreResult<OverrideSet>;

    fn put_dynamic_definition(&self, definition: &DynamicDefinition) -> StoreResult<()>;

    fn record_event(&self, event: &Event) -> StoreResult<()>;

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>>;
}

/// Build the next persisted version of `player`
pub(crate) fn next_persisted(player: &PlayerAggregate, now: DateTime<Utc>) -> PlayerAggregate {
    let (mut next, expired) = prepare_for_persist(player, now);
    if expired > 0 {
        debug!(player_id = %player.id, expired, "dropped expired buffs on save");
    }
    next.version = player.version + 1;
    next.updated_at = now;
    next
}

/// Load, recompute, save; on a version conflict reload and recompute.
///
/// `compute` returns the aggregate to write (or `None` when nothing changed)
/// plus a value handed back to the caller. It may run several times and must
/// be derived purely from the aggregate it is given.
pub fn update_with_retry<T, F>(
    repo: &dyn PlayerRepository,
    player_id: &str,
    max_retries: u32,
    mut compute: F,
) -> Result<(PlayerAggregate, T)>
where
    F: FnMut(&PlayerAggregate) -> Result<(Option<PlayerAggregate>, T)>,
{
    let attempts = max_retries + 1;

    for attempt in 1..=attempts {
        let current = repo.load_player(player_id)?;
        let (next, value) = compute(&current)?;

        let Some(next) = next else {
            return Ok((current, value));
        };

        match repo.save_player(&next) {
            Ok(saved) => return Ok((saved, value)),
            Err(err) if err.is_conflict() => {
                warn!(player_id, attempt, error = %err, "write conflict, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(EntitlementError::RetriesExhausted {
        player_id: player_id.to_string(),
        attempts,
    })
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Process-local store, used by tests and by embedders without SQLite
#[derive(Default)]
pub struct MemoryRepository {
    players: RwLock<HashMap<String, PlayerAggregate>>,
    definitions: RwLock<HashMap<String, DynamicDefinition>>,
    events: RwLock<Vec<Event>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerRepository for MemoryRepository {
    fn insert_player(&self, player: &PlayerAggregate) -> StoreResult<()> {
        let mut players = self.players.write().map_err(|_| StoreError::Poisoned)?;
        if players.contains_key(&player.id) {
            return Err(StoreError::DuplicatePlayer(player.id.clone()));
        }
        players.insert(player.id.clone(), player.clone());
        Ok(())
    }

    fn load_player(&self, id: &str) -> StoreResult<PlayerAggregate> {
        let players = self.players.read().map_err(|_| StoreError::Poisoned)?;
        players
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::PlayerNotFound(id.to_string()))
    }

    fn save_player(&self, player: &PlayerAggregate) -> StoreResult<PlayerAggregate> {
        let mut players = self.players.write().map_err(|_| StoreError::Poisoned)?;
        let stored = players
            .get(&player.id)
            .ok_or_else(|| StoreError::PlayerNotFound(player.id.clone()))?;

        if stored.version != player.version {
            return Err(StoreError::VersionConflict {
                id: player.id.clone(),
                expected: player.version,
                actual: stored.version,
            });
        }

        let next = next_persisted(player, Utc::now());
        players.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    fn list_player_ids(&self) -> StoreResult<Vec<String>> {
        let players = self.players.read().map_err(|_| StoreError::Poisoned)?;
        let mut ids: Vec<String> = players.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn dynamic_definitions(&self) -> StoreResult<OverrideSet> {
        let definitions = self.definitions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(OverrideSet::from(definitions.values().cloned().collect::<Vec<_>>()))
    }

    fn put_dynamic_definition(&self, definition: &DynamicDefinition) -> StoreResult<()> {
        let mut definitions = self.definitions.write().map_err(|_| StoreError::Poisoned)?;
        definitions.insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    fn record_event(&self, event: &Event) -> StoreResult<()> {
        let mut events = self.events.write().map_err(|_| StoreError::Poisoned)?;
        events.push(event.clone());
        Ok(())
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        let events = self.events.read().map_err(|_| StoreError::Poisoned)?;
        let mut matching: Vec<Event> = events
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching)
    }
}

// ============================================================================
// TESTS
// ============================================================================

/// Delegates to a `MemoryRepository` but cannot write audit events
#[cfg(test)]
pub(crate) struct AuditlessRepository(pub MemoryRepository);

#[cfg(test)]
impl PlayerRepository for AuditlessRepository {
    fn insert_player(&self, player: &PlayerAggregate) -> StoreResult<()> {
        self.0.insert_player(player)
    }

    fn load_player(&self, id: &str) -> StoreResult<PlayerAggregate> {
        self.0.load_player(id)
    }

    fn save_player(&self, player: &PlayerAggregate) -> StoreResult<PlayerAggregate> {
        self.0.save_player(player)
    }

    fn list_player_ids(&self) -> StoreResult<Vec<String>> {
        self.0.list_player_ids()
    }

    fn dynamic_definitions(&self) -> StoreResult<OverrideSet> {
        self.0.dynamic_definitions()
    }

    fn put_dynamic_definition(&self, definition: &DynamicDefinition) -> StoreResult<()> {
        self.0.put_dynamic_definition(definition)
    }

    fn record_event(&self, _event: &Event) -> StoreResult<()> {
        Err(StoreError::Poisoned)
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        self.0.events_for(entity_type, entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::BuffEntry;
    use chrono::Duration;

    #[test]
    fn test_save_bumps_version() {
        let repo = MemoryRepository::new();
        let player = PlayerAggregate::new("Ana");
        repo.insert_player(&player).unwrap();

        let saved = repo.save_player(&player).unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(repo.load_player(&player.id).unwrap().version, 2);
    }

    #[test]
    fn test_stale_write_is_rejected() {
        let repo = MemoryRepository::new();
        let player = PlayerAggregate::new("Ana");
        repo.insert_player(&player).unwrap();

        let mut first = repo.load_player(&player.id).unwrap();
        let mut second = repo.load_player(&player.id).unwrap();

        first.adjust_balance(100);
        repo.save_player(&first).unwrap();

        second.adjust_balance(5);
        let err = repo.save_player(&second).unwrap_err();
        assert!(err.is_conflict());

        // The first writer's change survived
        assert_eq!(repo.load_player(&player.id).unwrap().current_balance, 100);
    }

    #[test]
    fn test_save_applies_lazy_expiry() {
        let repo = MemoryRepository::new();
        let mut player = PlayerAggregate::new("Ana");
        player.active_buffs.push(BuffEntry {
            effect_code: "DUPLICADOR".to_string(),
            name: "Doubler".to_string(),
            image: String::new(),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            source: "STORE".to_string(),
        });
        repo.insert_player(&player).unwrap();

        let saved = repo.save_player(&player).unwrap();
        assert!(saved.active_buffs.is_empty());
    }

    #[test]
    fn test_update_with_retry_skips_unchanged() {
        let repo = MemoryRepository::new();
        let player = PlayerAggregate::new("Ana");
        repo.insert_player(&player).unwrap();

        let (stored, ()) = update_with_retry(&repo, &player.id, 3, |_| Ok((None, ()))).unwrap();
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn test_update_with_retry_recomputes_after_conflict() {
        let repo = MemoryRepository::new();
        let player = PlayerAggregate::new("Ana");
        repo.insert_player(&player).unwrap();

        let mut calls = 0;
        let (stored, ()) = update_with_retry(&repo, &player.id, 3, |current| {
            calls += 1;
            if calls == 1 {
                // A competing writer lands between our read and our write
                let mut other = current.clone();
                other.adjust_balance(50);
                repo.save_player(&other).unwrap();
            }
            let mut next = current.clone();
            next.adjust_balance(10);
            Ok((Some(next), ()))
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(stored.current_balance, 60);
    }

    #[test]
    fn test_update_with_retry_gives_up() {
        let repo = MemoryRepository::new();
        let player = PlayerAggregate::new("Ana");
        repo.insert_player(&player).unwrap();

        let result = update_with_retry(&repo, &player.id, 1, |current| {
            let mut other = current.clone();
            other.adjust_balance(1);
            repo.save_player(&other).unwrap();
            Ok((Some(current.clone()), ()))
        });

        assert!(matches!(
            result,
            Err(EntitlementError::RetriesExhausted { attempts: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_player() {
        let repo = MemoryRepository::new();
        assert!(matches!(
            repo.load_player("missing"),
            Err(StoreError::PlayerNotFound(_))
        ));
        assert!(matches!(
            repo.save_player(&PlayerAggregate::new("ghost")),
            Err(StoreError::PlayerNotFound(_))
        ));
    }
}
