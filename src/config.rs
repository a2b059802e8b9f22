//! Engine configuration.
//!
//! Sources, later wins: built-in defaults, an optional JSON file, then
//! environment variables (a `.env` file is honored by the binary).
//!
//! Environment variables:
//! - `RANK_DB_PATH` - SQLite file (default: `rank_entitlement.db`)
//! - `RANK_REWARD_CAP` - absolute cap for buffed rewards (default: 1000)
//! - `RANK_RECHARGE_MONTHS` - comma-separated QUARTERLY months (default: `5,8`)
//! - `RANK_SWEEP_WORKERS` - concurrent players per sweep (default: 4)
//! - `RANK_MAX_WRITE_RETRIES` - attempts after a version conflict (default: 3)
//! - `RANK_CATALOG_PATH` - static catalog JSON replacing the built-in one
//! - `RANK_BONUS_TABLE_PATH` - multiplier/blessing table JSON

use crate::lifecycle::RechargeCalendar;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub reward_cap: i64,
    pub recharge_months: Vec<u32>,
    pub sweep_workers: usize,
    pub max_write_retries: u32,
    pub catalog_path: Option<PathBuf>,
    pub bonus_table_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("rank_entitlement.db"),
            reward_cap: 1000,
            recharge_months: vec![5, 8],
            sweep_workers: 4,
            max_write_retries: 3,
            catalog_path: None,
            bonus_table_path: None,
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Defaults overlaid with whatever the environment sets
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Full resolution: optional file, then environment, then validation
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(path) = env::var("RANK_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(cap) = read_env::<i64>("RANK_REWARD_CAP") {
            self.reward_cap = cap;
        }
        if let Ok(raw) = env::var("RANK_RECHARGE_MONTHS") {
            let months: Vec<u32> = raw
                .split(',')
                .filter_map(|m| m.trim().parse().ok())
                .collect();
            if !months.is_empty() {
                self.recharge_months = months;
            }
        }
        if let Some(workers) = read_env::<usize>("RANK_SWEEP_WORKERS") {
            self.sweep_workers = workers;
        }
        if let Some(retries) = read_env::<u32>("RANK_MAX_WRITE_RETRIES") {
            self.max_write_retries = retries;
        }
        if let Ok(path) = env::var("RANK_CATALOG_PATH") {
            self.catalog_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var("RANK_BONUS_TABLE_PATH") {
            self.bonus_table_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.reward_cap < 0 {
            bail!("reward_cap must not be negative (got {})", self.reward_cap);
        }
        if self.sweep_workers == 0 {
            bail!("sweep_workers must be at least 1");
        }
        if let Some(month) = self.recharge_months.iter().find(|m| !(1..=12).contains(*m)) {
            bail!("recharge month {} is outside 1..=12", month);
        }
        Ok(())
    }

    pub fn recharge_calendar(&self) -> RechargeCalendar {
        RechargeCalendar::new(self.recharge_months.clone())
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reward_cap, 1000);
        assert_eq!(config.recharge_calendar(), RechargeCalendar::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"reward_cap": 500, "recharge_months": [1, 4, 7, 10]}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.reward_cap, 500);
        assert_eq!(config.recharge_months, vec![1, 4, 7, 10]);
        assert_eq!(config.sweep_workers, 4);
        assert_eq!(config.max_write_retries, 3);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad_month = EngineConfig {
            recharge_months: vec![5, 13],
            ..Default::default()
        };
        assert!(bad_month.validate().is_err());

        let no_workers = EngineConfig {
            sweep_workers: 0,
            ..Default::default()
        };
        assert!(no_workers.validate().is_err());

        let negative_cap = EngineConfig {
            reward_cap: -1,
            ..Default::default()
        };
        assert!(negative_cap.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EngineConfig::from_file(dir.path().join("absent.json")).is_err());
    }
}
