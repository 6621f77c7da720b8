use std::{fmt, path::PathBuf};

use itertools::Itertools;
use thiserror::Error;

use crate::{storage::StorageError, validate::FieldMismatch};

/// The part of a run a sampler failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The non-checkpointed bootstrap before checkpoint 1.
    TypicalSet,
    Checkpoint(u64),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::TypicalSet => write!(f, "typical set"),
            Stage::Checkpoint(index) => write!(f, "checkpoint {}", index),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChkptError {
    #[error("invalid checkpoint configuration: {0}")]
    Configuration(String),

    #[error("malformed run configuration: {0}")]
    InputType(String),

    #[error(
        "run configuration does not match the one recorded at {}: {}",
        .path.display(),
        .mismatches.iter().join("; ")
    )]
    RestartConsistency {
        path: PathBuf,
        mismatches: Vec<FieldMismatch>,
    },

    #[error("sampler failed during {stage}: {error:#}")]
    SamplerExecution { stage: Stage, error: anyhow::Error },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ChkptError>;
