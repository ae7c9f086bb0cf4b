//! Memory-bounded result store with an on-disk spillover.
//!
//! Entries live in memory while the sum of their footprints fits the
//! budget. Inserting past the budget writes the least recently used entries
//! to the spill directory until the new entry fits; an entry larger than the
//! whole budget goes straight to disk. Spilled entries are read back on
//! lookup and stay on disk.
//!
//! Spill files are written without holding the store lock; an entry on its
//! way to disk is still served from memory until the write lands.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::result::{CacheResult, CacheSnapshot};
use crate::{debug, log};
use crate::engine::RequestKey;
use crate::error::{EngineError, Result};

pub struct CacheStore {
    budget: u64,
    state: Mutex<StoreState>,
    /// Removed with the store
    spill_dir: TempDir,
}

#[derive(Default)]
struct StoreState {
    resident: FxHashMap<RequestKey, Resident>,
    /// Evicted, spill file not written yet
    spilling: FxHashMap<RequestKey, CacheResult>,
    spilled: FxHashMap<RequestKey, PathBuf>,
    memory: u64,
    tick: u64,
}

struct Resident {
    result: CacheResult,
    footprint: u64,
    last_used: u64,
}

impl CacheStore {
    /// Create a store; spill files go to a temporary directory below
    /// `spill_root` (or the system temp dir).
    pub fn new(budget: u64, spill_root: Option<&Path>) -> Result<Self> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("assetflow-cache-");
            b
        };
        let spill_dir = match spill_root {
            Some(root) => fs::create_dir_all(root)
                .and_then(|()| builder.tempdir_in(root))
                .map_err(|e| EngineError::Cache(root.to_path_buf(), e.to_string()))?,
            None => builder
                .tempdir()
                .map_err(|e| EngineError::Cache(std::env::temp_dir(), e.to_string()))?,
        };
        Ok(Self {
            budget,
            state: Mutex::new(StoreState::default()),
            spill_dir,
        })
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn spill_dir(&self) -> &Path {
        self.spill_dir.path()
    }

    /// Insert or replace the entry for `key`.
    pub fn put(&self, key: RequestKey, result: CacheResult) -> Result<()> {
        let footprint = result.footprint();

        if footprint > self.budget {
            let sequence = {
                let mut state = self.state.lock();
                Self::remove_locked(&mut state, &key);
                state.tick += 1;
                state.tick
            };
            let path = self.spill(&key, sequence, &result)?;
            debug!("cache"; "{key} ({footprint} bytes) exceeds budget, written to disk");
            let mut state = self.state.lock();
            Self::remove_locked(&mut state, &key);
            state.spilled.insert(key, path);
            return Ok(());
        }

        let victims = {
            let mut state = self.state.lock();
            Self::remove_locked(&mut state, &key);
            let victims = Self::evict_locked(&mut state, self.budget - footprint);

            state.tick += 1;
            let last_used = state.tick;
            state.memory += footprint;
            state.resident.insert(
                key,
                Resident {
                    result,
                    footprint,
                    last_used,
                },
            );
            victims
        };

        for (victim, sequence, result) in victims {
            self.finish_spill(victim, sequence, &result);
        }
        Ok(())
    }

    /// Move least recently used entries to `spilling` until at most
    /// `limit` bytes stay resident.
    fn evict_locked(state: &mut StoreState, limit: u64) -> Vec<(RequestKey, u64, CacheResult)> {
        let mut victims = Vec::new();
        while state.memory > limit {
            let Some(victim) = state
                .resident
                .iter()
                .min_by_key(|(_, r)| r.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            let Some(entry) = state.resident.remove(&victim) else {
                break;
            };
            state.memory -= entry.footprint;
            state.tick += 1;
            state.spilling.insert(victim.clone(), entry.result.clone());
            victims.push((victim, state.tick, entry.result));
        }
        victims
    }

    /// Write an evicted entry and record its file, unless it was removed or
    /// replaced meanwhile. An entry that cannot be written is dropped.
    fn finish_spill(&self, key: RequestKey, sequence: u64, result: &CacheResult) {
        let written = self.spill(&key, sequence, result);
        let mut state = self.state.lock();
        let pending = state.spilling.remove(&key).is_some();
        match written {
            Ok(path) if pending => {
                debug!("cache"; "spilled {key}");
                state.spilled.insert(key, path);
            }
            Ok(path) => {
                let _ = fs::remove_file(path);
            }
            Err(e) => log!("cache"; "dropping {key}: {e}"),
        }
    }

    /// Look up `key`, reading spilled entries back from disk.
    pub fn get(&self, key: &RequestKey) -> Result<Option<CacheResult>> {
        let path = {
            let mut state = self.state.lock();
            state.tick += 1;
            let tick = state.tick;
            if let Some(resident) = state.resident.get_mut(key) {
                resident.last_used = tick;
                return Ok(Some(resident.result.clone()));
            }
            if let Some(result) = state.spilling.get(key) {
                return Ok(Some(result.clone()));
            }
            match state.spilled.get(key) {
                Some(path) => path.clone(),
                None => return Ok(None),
            }
        };
        read_spill(&path).map(Some)
    }

    pub fn remove(&self, key: &RequestKey) -> bool {
        Self::remove_locked(&mut self.state.lock(), key)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        for path in state.spilled.values() {
            let _ = fs::remove_file(path);
        }
        *state = StoreState::default();
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        let state = self.state.lock();
        state.resident.contains_key(key)
            || state.spilling.contains_key(key)
            || state.spilled.contains_key(key)
    }

    /// Sum of resident footprints.
    pub fn memory_in_use(&self) -> u64 {
        self.state.lock().memory
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.resident.len() + state.spilling.len() + state.spilled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries on disk or on their way there.
    pub fn spilled_count(&self) -> usize {
        let state = self.state.lock();
        state.spilling.len() + state.spilled.len()
    }

    fn remove_locked(state: &mut StoreState, key: &RequestKey) -> bool {
        if let Some(entry) = state.resident.remove(key) {
            state.memory -= entry.footprint;
            return true;
        }
        if state.spilling.remove(key).is_some() {
            return true;
        }
        match state.spilled.remove(key) {
            Some(path) => {
                let _ = fs::remove_file(path);
                true
            }
            None => false,
        }
    }

    fn spill(&self, key: &RequestKey, sequence: u64, result: &CacheResult) -> Result<PathBuf> {
        let path = self
            .spill_dir
            .path()
            .join(format!("{}-{sequence}.json", key.file_stem()));
        let snapshot = result.snapshot()?;
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| EngineError::Cache(path.clone(), e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| EngineError::Cache(path.clone(), e.to_string()))?;
        Ok(path)
    }
}

fn read_spill(path: &Path) -> Result<CacheResult> {
    let bytes = fs::read(path).map_err(|e| EngineError::Cache(path.to_path_buf(), e.to_string()))?;
    let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Cache(path.to_path_buf(), e.to_string()))?;
    Ok(CacheResult::from_snapshot(snapshot))
}
