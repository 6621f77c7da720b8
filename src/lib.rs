pub(crate) mod config;
pub(crate) mod driver;
pub(crate) mod error;
pub(crate) mod model;
pub(crate) mod plan;
pub(crate) mod progress;
pub(crate) mod rwm;
pub(crate) mod sampler;
pub(crate) mod stepsize;
pub(crate) mod storage;
pub(crate) mod validate;

pub use config::{ControlOptions, RunConfiguration, RunRequest};
pub use driver::{RunDriver, RunOutcome, RunStatus, RunSummary};
pub use error::{ChkptError, Result, Stage};
pub use model::{LogDensity, LogpError};
pub use plan::{CheckpointPlan, Phase};
pub use progress::{ProgressCallback, ProgressRecord};
pub use rwm::{ChainState, RandomWalkSampler, RwmState};
pub use sampler::{
    ChainDraws, ChunkOutput, ChunkResult, SampleRequest, SamplerCapability, SamplerState,
};
pub use stepsize::{DualAverage, DualAverageSettings};
pub use storage::{CheckpointStore, FsStore, HashMapStore, StorageError};
pub use validate::{check_restart, diff, FieldMismatch};
