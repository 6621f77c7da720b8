use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};

use super::{CheckpointStore, StorageError};
use crate::{
    config::RunConfiguration,
    sampler::{ChunkResult, SamplerState},
};

/// Checkpoint store that lives in memory.
///
/// Snapshots are kept serialized, exactly like on disk, so a state loaded
/// from this store went through the same round trip as one loaded from an
/// [`FsStore`](super::FsStore).
#[derive(Debug, Clone, Default)]
pub struct HashMapStore {
    config: Option<RunConfiguration>,
    states: BTreeMap<u64, String>,
    results: BTreeMap<u64, ChunkResult>,
}

fn memory_path(kind: &str, index: u64) -> PathBuf {
    PathBuf::from(format!("<memory>/{}/{}", kind, index))
}

impl HashMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized snapshot of checkpoint `index`.
    pub fn raw_state(&self, index: u64) -> Option<&str> {
        self.states.get(&index).map(|state| state.as_str())
    }
}

impl CheckpointStore for HashMapStore {
    fn load_config(&self) -> Result<Option<RunConfiguration>, StorageError> {
        Ok(self.config.clone())
    }

    fn store_config(&mut self, config: &RunConfiguration) -> Result<(), StorageError> {
        if self.config.is_some() {
            return Err(StorageError::AlreadyExists {
                kind: "run configuration",
                index: 0,
            });
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn state_indices(&self) -> Result<Vec<u64>, StorageError> {
        Ok(self.states.keys().copied().collect())
    }

    fn result_indices(&self) -> Result<Vec<u64>, StorageError> {
        Ok(self.results.keys().copied().collect())
    }

    fn load_state<S: DeserializeOwned>(&self, index: u64) -> Result<SamplerState<S>, StorageError> {
        let text = self.states.get(&index).ok_or(StorageError::Missing {
            kind: "sampler state",
            index,
        })?;
        serde_json::from_str(text).map_err(|source| StorageError::Json {
            path: memory_path("states", index),
            source,
        })
    }

    fn store_state<S: Serialize>(&mut self, state: &SamplerState<S>) -> Result<(), StorageError> {
        if self.states.contains_key(&state.index) {
            return Err(StorageError::AlreadyExists {
                kind: "sampler state",
                index: state.index,
            });
        }
        let text = serde_json::to_string(state).map_err(|source| StorageError::Json {
            path: memory_path("states", state.index),
            source,
        })?;
        self.states.insert(state.index, text);
        Ok(())
    }

    fn load_result(&self, index: u64) -> Result<ChunkResult, StorageError> {
        self.results
            .get(&index)
            .cloned()
            .ok_or(StorageError::Missing {
                kind: "chunk result",
                index,
            })
    }

    fn store_result(&mut self, result: &ChunkResult) -> Result<(), StorageError> {
        if self.results.contains_key(&result.index) {
            return Err(StorageError::AlreadyExists {
                kind: "chunk result",
                index: result.index,
            });
        }
        self.results.insert(result.index, result.clone());
        Ok(())
    }
}
