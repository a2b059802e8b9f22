// 🗄️ SQLite Store - players, operator catalog, audit trail
//
// Player aggregates are stored one row per player. Nested lists (roles,
// inventory, buffs) are JSON text columns so the whole aggregate is written in
// a single UPDATE guarded by its version:
//
//   UPDATE players SET ... , version = version + 1
//   WHERE id = ? AND version = ?
//
// Zero rows touched means someone else wrote first (or the player is gone).

use crate::catalog::{Diagnostic, DynamicDefinition, OverrideSet, ResetPeriod, SkillKind};
use crate::error::StoreError;
use crate::player::PlayerAggregate;
use crate::repository::{next_persisted, PlayerRepository, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Event for audit trail: every grant, reconcile and recharge leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }

    /// Shorthand for events about a player
    pub fn for_player(event_type: &str, player_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Event::new(event_type, "player", player_id, data, actor)
    }
}

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // WAL so the sweep and interactive writers do not block each other's reads
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS players (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            lifetime_high_score INTEGER NOT NULL DEFAULT 0,
            current_balance INTEGER NOT NULL DEFAULT 0,
            roles TEXT NOT NULL DEFAULT '[]',
            inventory TEXT NOT NULL DEFAULT '[]',
            active_buffs TEXT NOT NULL DEFAULT '[]',
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Operator overrides, joined to static definitions by name
    conn.execute(
        "CREATE TABLE IF NOT EXISTS dynamic_definitions (
            name TEXT PRIMARY KEY,
            description TEXT,
            image TEXT,
            kind TEXT,
            max_uses INTEGER,
            reset_period TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_players_score ON players(lifetime_high_score)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> StoreResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> StoreResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
                Ok(Event {
                    event_id,
                    timestamp: parse_timestamp("timestamp", &timestamp)?,
                    event_type,
                    entity_type,
                    entity_id,
                    data: serde_json::from_str(&data)?,
                    actor,
                })
            },
        )
        .collect()
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn parse_timestamp(column: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidColumn {
            column,
            value: value.to_string(),
        })
}

fn parse_column<T: FromStr>(column: &'static str, value: Option<String>) -> StoreResult<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| StoreError::InvalidColumn { column, value: raw }),
    }
}

/// Raw `players` row, before the JSON columns are decoded
struct PlayerRow {
    id: String,
    display_name: String,
    lifetime_high_score: i64,
    current_balance: i64,
    roles: String,
    inventory: String,
    active_buffs: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

const PLAYER_COLUMNS: &str = "id, display_name, lifetime_high_score, current_balance,
     roles, inventory, active_buffs, version, created_at, updated_at";

impl PlayerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PlayerRow {
            id: row.get(0)?,
            display_name: row.get(1)?,
            lifetime_high_score: row.get(2)?,
            current_balance: row.get(3)?,
            roles: row.get(4)?,
            inventory: row.get(5)?,
            active_buffs: row.get(6)?,
            version: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_player(self) -> StoreResult<PlayerAggregate> {
        Ok(PlayerAggregate {
            id: self.id,
            display_name: self.display_name,
            lifetime_high_score: self.lifetime_high_score,
            current_balance: self.current_balance,
            roles: serde_json::from_str(&self.roles)?,
            inventory: serde_json::from_str(&self.inventory)?,
            active_buffs: serde_json::from_str(&self.active_buffs)?,
            version: self.version,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

fn optional_text(column: &'static str, value: Value) -> StoreResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        Value::Integer(i) => Ok(Some(i.to_string())),
        Value::Real(r) => Ok(Some(r.to_string())),
        Value::Blob(_) => Err(StoreError::InvalidColumn {
            column,
            value: "<blob>".to_string(),
        }),
    }
}

fn optional_count(column: &'static str, value: Value) -> StoreResult<Option<u32>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(i) => u32::try_from(i)
            .map(Some)
            .map_err(|_| StoreError::InvalidColumn {
                column,
                value: i.to_string(),
            }),
        other => {
            let raw = optional_text(column, other)?.unwrap_or_default();
            parse_column::<u32>(column, Some(raw))
        }
    }
}

/// Raw `dynamic_definitions` row. Columns are read untyped so a single bad
/// value only rejects its own row.
struct DefinitionRow {
    name: Value,
    description: Value,
    image: Value,
    kind: Value,
    max_uses: Value,
    reset_period: Value,
    updated_at: Value,
}

impl DefinitionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DefinitionRow {
            name: row.get(0)?,
            description: row.get(1)?,
            image: row.get(2)?,
            kind: row.get(3)?,
            max_uses: row.get(4)?,
            reset_period: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_definition(self, name: String) -> StoreResult<DynamicDefinition> {
        let updated_at = match optional_text("updated_at", self.updated_at)? {
            Some(ts) => Some(parse_timestamp("updated_at", &ts)?),
            None => None,
        };

        Ok(DynamicDefinition {
            name,
            description: optional_text("description", self.description)?,
            image: optional_text("image", self.image)?,
            kind: parse_column::<SkillKind>("kind", optional_text("kind", self.kind)?)?,
            max_uses: optional_count("max_uses", self.max_uses)?,
            reset_period: parse_column::<ResetPeriod>(
                "reset_period",
                optional_text("reset_period", self.reset_period)?,
            )?,
            updated_at,
        })
    }
}

// ============================================================================
// SQLITE REPOSITORY
// ============================================================================

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        setup_database(&conn)?;
        info!(path = %path.as_ref().display(), "opened player store");
        Ok(SqliteRepository {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteRepository {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn count_players(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl PlayerRepository for SqliteRepository {
    fn insert_player(&self, player: &PlayerAggregate) -> StoreResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO players (
                id, display_name, lifetime_high_score, current_balance,
                roles, inventory, active_buffs, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                player.id,
                player.display_name,
                player.lifetime_high_score,
                player.current_balance,
                serde_json::to_string(&player.roles)?,
                serde_json::to_string(&player.inventory)?,
                serde_json::to_string(&player.active_buffs)?,
                player.version,
                player.created_at.to_rfc3339(),
                player.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicatePlayer(player.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn load_player(&self, id: &str) -> StoreResult<PlayerAggregate> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM players WHERE id = ?1", PLAYER_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], PlayerRow::from_row)
            .optional()?
            .ok_or_else(|| StoreError::PlayerNotFound(id.to_string()))?;
        row.into_player()
    }

    fn save_player(&self, player: &PlayerAggregate) -> StoreResult<PlayerAggregate> {
        let next = next_persisted(player, Utc::now());
        let conn = self.conn()?;

        let updated = conn.execute(
            "UPDATE players SET
                display_name = ?1,
                lifetime_high_score = ?2,
                current_balance = ?3,
                roles = ?4,
                inventory = ?5,
                active_buffs = ?6,
                version = ?7,
                updated_at = ?8
             WHERE id = ?9 AND version = ?10",
            params![
                next.display_name,
                next.lifetime_high_score,
                next.current_balance,
                serde_json::to_string(&next.roles)?,
                serde_json::to_string(&next.inventory)?,
                serde_json::to_string(&next.active_buffs)?,
                next.version,
                next.updated_at.to_rfc3339(),
                player.id,
                player.version,
            ],
        )?;

        if updated == 0 {
            let stored: Option<i64> = conn
                .query_row(
                    "SELECT version FROM players WHERE id = ?1",
                    params![player.id],
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match stored {
                None => StoreError::PlayerNotFound(player.id.clone()),
                Some(actual) => StoreError::VersionConflict {
                    id: player.id.clone(),
                    expected: player.version,
                    actual,
                },
            });
        }

        debug!(player_id = %next.id, version = next.version, "saved player");
        Ok(next)
    }

    fn list_player_ids(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM players ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn dynamic_definitions(&self) -> StoreResult<OverrideSet> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, description, image, kind, max_uses, reset_period, updated_at
             FROM dynamic_definitions
             ORDER BY name",
        )?;

        let rows = stmt
            .query_map([], DefinitionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut overrides = OverrideSet::default();
        for row in rows {
            let name = match optional_text("name", row.name.clone()) {
                Ok(Some(name)) if !name.trim().is_empty() => name,
                _ => {
                    overrides.invalid.push(Diagnostic::InvalidOverride {
                        name: String::new(),
                        reason: "missing name".to_string(),
                    });
                    continue;
                }
            };

            match row.into_definition(name.clone()) {
                Ok(definition) => overrides.definitions.push(definition),
                Err(err) => {
                    debug!(%name, error = %err, "skipping undecodable override row");
                    overrides.invalid.push(Diagnostic::InvalidOverride {
                        name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(overrides)
    }

    fn put_dynamic_definition(&self, definition: &DynamicDefinition) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated_at = definition.updated_at.unwrap_or_else(Utc::now);

        conn.execute(
            "INSERT INTO dynamic_definitions (
                name, description, image, kind, max_uses, reset_period, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                image = excluded.image,
                kind = excluded.kind,
                max_uses = excluded.max_uses,
                reset_period = excluded.reset_period,
                updated_at = excluded.updated_at",
            params![
                definition.name,
                definition.description,
                definition.image,
                definition.kind.map(|k| k.as_str()),
                definition.max_uses,
                definition.reset_period.map(|p| p.as_str()),
                updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    fn record_event(&self, event: &Event) -> StoreResult<()> {
        let conn = self.conn()?;
        insert_event(&conn, event)
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        let conn = self.conn()?;
        get_events_for_entity(&conn, entity_type, entity_id)
    }
}
