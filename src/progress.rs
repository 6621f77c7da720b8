use std::fmt;

use crate::plan::{CheckpointPlan, Phase};

/// Where a run stands after finishing a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
    pub index: u64,
    pub total_chkpts: u64,
    pub iteration: u64,
    pub total_iterations: u64,
    pub phase: Phase,
}

impl ProgressRecord {
    pub fn new(plan: &CheckpointPlan, index: u64, phase: Phase) -> Self {
        Self {
            index,
            total_chkpts: plan.total_chkpts,
            iteration: plan.iteration(index),
            total_iterations: plan.total_iterations(),
            phase,
        }
    }

    pub fn is_last(&self) -> bool {
        self.index == self.total_chkpts
    }
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chkpt: {} / {}; Iteration: {} / {} ({})",
            self.index, self.total_chkpts, self.iteration, self.total_iterations, self.phase
        )
    }
}

/// Receives a record after every persisted checkpoint.
pub struct ProgressCallback {
    pub callback: Box<dyn FnMut(&ProgressRecord) + Send>,
}

impl ProgressCallback {
    pub fn new(callback: impl FnMut(&ProgressRecord) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Print every record as a line on stdout.
    pub fn stdout() -> Self {
        Self::new(|record| println!("{}", record))
    }

    pub(crate) fn emit(&mut self, record: &ProgressRecord) {
        (self.callback)(record)
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCallback").finish_non_exhaustive()
    }
}
