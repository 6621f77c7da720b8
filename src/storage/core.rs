use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    config::RunConfiguration,
    sampler::{ChunkResult, SamplerState},
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not (de)serialize {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("malformed draws file {path}, line {line}: {message}")]
    Csv {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{kind} for checkpoint {index} already exists")]
    AlreadyExists { kind: &'static str, index: u64 },

    #[error("no {kind} stored for checkpoint {index}")]
    Missing { kind: &'static str, index: u64 },

    #[error("{path} holds checkpoints but no recorded run configuration")]
    MissingConfig { path: PathBuf },
}

/// Durable storage of the run configuration, sampler snapshots and
/// retained draws of one checkpointed run.
///
/// Snapshots and results are write-once: storing an index that already
/// exists fails and leaves the stored value untouched.
pub trait CheckpointStore {
    fn load_config(&self) -> Result<Option<RunConfiguration>, StorageError>;

    fn store_config(&mut self, config: &RunConfiguration) -> Result<(), StorageError>;

    /// Indices of all stored sampler snapshots, in increasing order.
    fn state_indices(&self) -> Result<Vec<u64>, StorageError>;

    /// Indices of all stored chunk results, in increasing order.
    fn result_indices(&self) -> Result<Vec<u64>, StorageError>;

    fn load_state<S: DeserializeOwned>(&self, index: u64) -> Result<SamplerState<S>, StorageError>;

    fn store_state<S: Serialize>(&mut self, state: &SamplerState<S>) -> Result<(), StorageError>;

    fn load_result(&self, index: u64) -> Result<ChunkResult, StorageError>;

    fn store_result(&mut self, result: &ChunkResult) -> Result<(), StorageError>;

    /// Directory the store persists to, `None` for stores without one.
    fn location(&self) -> Option<&Path> {
        None
    }

    /// The highest stored snapshot index, where a resumed run continues.
    fn last_checkpoint(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.state_indices()?.last().copied())
    }
}

impl<T: CheckpointStore + ?Sized> CheckpointStore for &mut T {
    fn location(&self) -> Option<&Path> {
        (**self).location()
    }

    fn load_config(&self) -> Result<Option<RunConfiguration>, StorageError> {
        (**self).load_config()
    }

    fn store_config(&mut self, config: &RunConfiguration) -> Result<(), StorageError> {
        (**self).store_config(config)
    }

    fn state_indices(&self) -> Result<Vec<u64>, StorageError> {
        (**self).state_indices()
    }

    fn result_indices(&self) -> Result<Vec<u64>, StorageError> {
        (**self).result_indices()
    }

    fn load_state<S: DeserializeOwned>(&self, index: u64) -> Result<SamplerState<S>, StorageError> {
        (**self).load_state(index)
    }

    fn store_state<S: Serialize>(&mut self, state: &SamplerState<S>) -> Result<(), StorageError> {
        (**self).store_state(state)
    }

    fn load_result(&self, index: u64) -> Result<ChunkResult, StorageError> {
        (**self).load_result(index)
    }

    fn store_result(&mut self, result: &ChunkResult) -> Result<(), StorageError> {
        (**self).store_result(result)
    }
}
