use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::RunConfiguration,
    error::{ChkptError, Result},
};

/// Whether a checkpoint still adapts the sampler or retains its draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Warmup,
    Sample,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Warmup => write!(f, "warmup"),
            Phase::Sample => write!(f, "sample"),
        }
    }
}

/// Partition of a run into equally sized checkpoints.
///
/// Checkpoints are numbered from 1. Checkpoint `i` ends at iteration
/// `i * iter_per_chkpt`, and the first `warmup_chkpts` of them are warmup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPlan {
    pub warmup_chkpts: u64,
    pub total_chkpts: u64,
    pub iter_per_chkpt: u64,
}

impl CheckpointPlan {
    pub fn new(iter_warmup: u64, iter_sampling: u64, iter_per_chkpt: u64) -> Result<Self> {
        if iter_per_chkpt == 0 {
            return Err(ChkptError::Configuration(
                "iter_per_chkpt must be positive".into(),
            ));
        }
        if iter_sampling == 0 {
            return Err(ChkptError::Configuration(
                "iter_sampling must be positive".into(),
            ));
        }
        if iter_warmup % iter_per_chkpt != 0 {
            return Err(ChkptError::Configuration(format!(
                "iter_warmup ({}) is not divisible by iter_per_chkpt ({})",
                iter_warmup, iter_per_chkpt
            )));
        }
        if iter_sampling % iter_per_chkpt != 0 {
            return Err(ChkptError::Configuration(format!(
                "iter_sampling ({}) is not divisible by iter_per_chkpt ({})",
                iter_sampling, iter_per_chkpt
            )));
        }
        let warmup_chkpts = iter_warmup / iter_per_chkpt;
        Ok(Self {
            warmup_chkpts,
            total_chkpts: warmup_chkpts + iter_sampling / iter_per_chkpt,
            iter_per_chkpt,
        })
    }

    /// Plan a run and make sure every checkpoint seed is representable.
    pub fn from_config(config: &RunConfiguration) -> Result<Self> {
        let plan = Self::new(
            config.iter_warmup,
            config.iter_sampling,
            config.iter_per_chkpt,
        )?;
        if config.seed.checked_add(plan.total_chkpts).is_none() {
            return Err(ChkptError::Configuration(format!(
                "seed {} overflows when offset by {} checkpoints",
                config.seed, plan.total_chkpts
            )));
        }
        Ok(plan)
    }

    pub fn phase(&self, index: u64) -> Phase {
        if index <= self.warmup_chkpts {
            Phase::Warmup
        } else {
            Phase::Sample
        }
    }

    /// Seed of checkpoint `index`. Depends on nothing but the index, so a
    /// retried checkpoint sees the same seed.
    pub fn seed_for(base_seed: u64, index: u64) -> u64 {
        base_seed.wrapping_add(index)
    }

    /// Number of checkpointed iterations finished after checkpoint `index`.
    pub fn iteration(&self, index: u64) -> u64 {
        index * self.iter_per_chkpt
    }

    pub fn total_iterations(&self) -> u64 {
        self.iteration(self.total_chkpts)
    }

    pub fn sampling_chkpts(&self) -> u64 {
        self.total_chkpts - self.warmup_chkpts
    }

    /// Checkpoints that still have to run when `last` is the highest
    /// persisted one.
    pub fn remaining(&self, last: Option<u64>) -> std::ops::RangeInclusive<u64> {
        last.unwrap_or(0) + 1..=self.total_chkpts
    }

    pub fn is_complete(&self, last: Option<u64>) -> bool {
        last.is_some_and(|last| last >= self.total_chkpts)
    }
}
