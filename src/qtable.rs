// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Q-table storage
//!
//! The table maps a discretized network state `(throughput, rtt, loss)` to
//! five action-value estimates. The on-disk JSON keeps the historical shape:
//! state keys are the tuple rendered as `"(3, 1, 2)"` and action keys are
//! stringified integers `"0"`..`"4"`, so tables saved by older builds keep
//! loading. Saves are atomic: write `.tmp`, rotate the current file to the
//! backup name, rename `.tmp` into place.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{DownloadError, Result};

/// Number of discrete actions
pub const ACTION_COUNT: usize = 5;

/// Discretized network state: (throughput level, rtt level, loss level)
pub type StateKey = (u8, u8, u8);

/// Tabular action-value store. Every present state holds exactly five
/// action entries by construction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QTable {
    entries: HashMap<StateKey, [f64; ACTION_COUNT]>,
}

impl QTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Action values for a state, if it has been visited
    pub fn get(&self, state: StateKey) -> Option<&[f64; ACTION_COUNT]> {
        self.entries.get(&state)
    }

    /// Action values for a state, initializing new states to all zeros
    pub fn ensure(&mut self, state: StateKey) -> &mut [f64; ACTION_COUNT] {
        self.entries.entry(state).or_insert([0.0; ACTION_COUNT])
    }

    /// Value of one (state, action) pair; unseen states read as 0
    pub fn value(&self, state: StateKey, action: usize) -> f64 {
        self.entries
            .get(&state)
            .map(|values| values[action])
            .unwrap_or(0.0)
    }

    /// Best action value in a state; unseen states read as 0
    pub fn max_value(&self, state: StateKey) -> f64 {
        self.entries
            .get(&state)
            .map(|values| values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, state: StateKey, action: usize, value: f64) {
        self.ensure(state)[action] = value;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &[f64; ACTION_COUNT])> {
        self.entries.iter()
    }
}

/// Counters and learning state persisted alongside the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTableMeta {
    pub total_states: usize,
    pub total_decisions: u64,
    pub total_updates: u64,
    pub exploration_rate: f64,
    /// Unix timestamp of the save
    pub timestamp: i64,
}

impl Default for QTableMeta {
    fn default() -> Self {
        Self {
            total_states: 0,
            total_decisions: 0,
            total_updates: 0,
            exploration_rate: crate::constants::RL_EXPLORATION_RATE,
            timestamp: 0,
        }
    }
}

/// File-backed persistence for a Q-table
#[derive(Debug, Clone)]
pub struct QTableStore {
    path: PathBuf,
    backup_path: PathBuf,
}

impl QTableStore {
    pub fn new(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_path: backup_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically persist the table and metadata
    pub fn save(&self, table: &QTable, meta: &QTableMeta) -> Result<()> {
        let mut states = Map::new();
        let mut keys: Vec<&StateKey> = table.entries.keys().collect();
        keys.sort();
        for state in keys {
            let values = &table.entries[state];
            let mut actions = Map::new();
            for (action, value) in values.iter().enumerate() {
                actions.insert(action.to_string(), json!(value));
            }
            states.insert(format_state_key(*state), Value::Object(actions));
        }

        let meta = QTableMeta {
            total_states: table.len(),
            timestamp: chrono::Utc::now().timestamp(),
            ..meta.clone()
        };

        let document = json!({
            "q_table": Value::Object(states),
            "metadata": meta,
        });

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(&document)?)?;

        if self.path.exists() {
            std::fs::rename(&self.path, &self.backup_path)?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        info!(
            "Q-table saved: {} states, {} updates",
            meta.total_states, meta.total_updates
        );
        Ok(())
    }

    /// Load the table; a missing file yields an empty table, and malformed
    /// entries inside an otherwise readable file are skipped
    pub fn load(&self) -> Result<(QTable, QTableMeta)> {
        if !self.path.exists() {
            debug!("No Q-table at {}, starting empty", self.path.display());
            return Ok((QTable::new(), QTableMeta::default()));
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| DownloadError::internal(format!("Corrupt Q-table file: {e}")))?;

        let mut table = QTable::new();
        if let Some(states) = document.get("q_table").and_then(Value::as_object) {
            for (state_str, actions) in states {
                let Some(state) = parse_state_key(state_str) else {
                    warn!("Skipping malformed Q-table state key {state_str:?}");
                    continue;
                };
                let Some(actions) = actions.as_object() else {
                    warn!("Skipping malformed Q-table entry for {state_str:?}");
                    continue;
                };

                let values = table.ensure(state);
                for (action_str, value) in actions {
                    let Ok(action) = action_str.parse::<usize>() else {
                        continue;
                    };
                    if action >= ACTION_COUNT {
                        continue;
                    }
                    if let Some(v) = value.as_f64() {
                        values[action] = v;
                    }
                }
            }
        }

        let meta = document
            .get("metadata")
            .and_then(|m| serde_json::from_value::<QTableMeta>(m.clone()).ok())
            .unwrap_or_default();

        info!("Q-table loaded: {} states", table.len());
        Ok((table, meta))
    }
}

/// Render a state as the historical tuple form, e.g. `(3, 1, 2)`
pub fn format_state_key(state: StateKey) -> String {
    format!("({}, {}, {})", state.0, state.1, state.2)
}

/// Parse the tuple form back; `None` for anything malformed
pub fn parse_state_key(raw: &str) -> Option<StateKey> {
    let inner = raw.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut parts = inner.split(',').map(|p| p.trim().parse::<u8>());
    let t = parts.next()?.ok()?;
    let r = parts.next()?.ok()?;
    let l = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((t, r, l))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_round_trip() {
        assert_eq!(format_state_key((3, 1, 2)), "(3, 1, 2)");
        assert_eq!(parse_state_key("(3, 1, 2)"), Some((3, 1, 2)));
        assert_eq!(parse_state_key("(5,0,4)"), Some((5, 0, 4)));
        assert_eq!(parse_state_key("3, 1, 2"), None);
        assert_eq!(parse_state_key("(3, 1)"), None);
        assert_eq!(parse_state_key("(3, 1, 2, 9)"), None);
        assert_eq!(parse_state_key("(a, 1, 2)"), None);
    }

    #[test]
    fn test_unseen_state_reads_zero() {
        let table = QTable::new();
        assert_eq!(table.value((0, 0, 0), 2), 0.0);
        assert_eq!(table.max_value((0, 0, 0)), 0.0);
    }

    #[test]
    fn test_ensure_initializes_five_zeros() {
        let mut table = QTable::new();
        let values = table.ensure((2, 1, 0));
        assert_eq!(values, &[0.0; ACTION_COUNT]);
    }
}
