use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::anyhow;
use tracing::{debug, info, info_span, warn};

use crate::{
    config::{RunConfiguration, RunRequest},
    error::{ChkptError, Result, Stage},
    plan::{CheckpointPlan, Phase},
    progress::{ProgressCallback, ProgressRecord},
    sampler::{ChunkResult, SampleRequest, SamplerCapability, SamplerState},
    storage::{CheckpointStore, StorageError},
    validate,
};

/// States of a checkpointed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NotStarted,
    TypicalSet,
    Warmup,
    Sampling,
    Complete,
}

/// What a finished run looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub config: RunConfiguration,
    pub plan: CheckpointPlan,
    /// Checkpoints executed by this invocation.
    pub chunks_run: u64,
    /// Checkpoints with retained draws.
    pub result_indices: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// This invocation ran the last checkpoint.
    Completed(RunSummary),
    /// Nothing was left to do.
    AlreadyComplete(RunSummary),
    /// The stop signal was raised. Everything up to `last_chkpt` is
    /// persisted and the next invocation continues after it.
    Interrupted {
        last_chkpt: Option<u64>,
        chunks_run: u64,
    },
}

/// Runs a sampler capability in checkpointed chunks against a store.
///
/// Chunks are strictly sequential: chunk `i + 1` starts only after the
/// state of chunk `i` is persisted. A failure inside a chunk persists
/// nothing for it, so the next invocation repeats the whole chunk with the
/// same seed.
pub struct RunDriver<C, St> {
    capability: C,
    store: St,
    config: RunConfiguration,
    plan: CheckpointPlan,
    status: RunStatus,
    show_progress: bool,
    progress: ProgressCallback,
    stop: Option<Arc<AtomicBool>>,
}

impl<C, St> RunDriver<C, St>
where
    C: SamplerCapability,
    St: CheckpointStore,
{
    /// Validate and plan a run. Fails before the sampler is ever invoked if
    /// the configuration is malformed or not evenly divisible into
    /// checkpoints.
    pub fn new(request: impl Into<RunRequest>, capability: C, store: St) -> Result<Self> {
        let request = request.into();
        request.config.validate()?;
        let plan = CheckpointPlan::from_config(&request.config)?;
        if let Some(location) = store.location() {
            if location != request.config.path.as_path() {
                return Err(ChkptError::InputType(format!(
                    "run path {} does not match the checkpoint store at {}",
                    request.config.path.display(),
                    location.display()
                )));
            }
        }
        Ok(Self {
            capability,
            store,
            config: request.config,
            plan,
            status: RunStatus::NotStarted,
            show_progress: request.progress,
            progress: ProgressCallback::stdout(),
            stop: None,
        })
    }

    /// Replace the default stdout progress lines. Still silenced if the
    /// request disabled progress.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = callback;
        self
    }

    /// Stop at the next checkpoint boundary once `stop` is set.
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn plan(&self) -> &CheckpointPlan {
        &self.plan
    }

    /// Status of this driver within the current invocation.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn into_parts(self) -> (C, St) {
        (self.capability, self.store)
    }

    /// Where a run against the store would continue, without running
    /// anything.
    pub fn inspect(&self) -> Result<(RunStatus, Option<u64>)> {
        let last = self.store.last_checkpoint()?;
        let status = match last {
            None => RunStatus::NotStarted,
            Some(_) if self.plan.is_complete(last) => RunStatus::Complete,
            Some(index) if self.plan.phase(index + 1) == Phase::Warmup => RunStatus::Warmup,
            Some(_) => RunStatus::Sampling,
        };
        Ok((status, last))
    }

    /// Run all checkpoints that are not yet persisted.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let last = self.check_configuration()?;

        if self.plan.is_complete(last) {
            self.status = RunStatus::Complete;
            info!(
                path = %self.config.path.display(),
                total_chkpts = self.plan.total_chkpts,
                "run is already complete"
            );
            return Ok(RunOutcome::AlreadyComplete(self.summary(0)?));
        }

        if last.is_none() && self.stop_requested() {
            info!("stopping before the typical set");
            return Ok(RunOutcome::Interrupted {
                last_chkpt: None,
                chunks_run: 0,
            });
        }

        let mut state = match last {
            None => self.typical_set()?,
            Some(index) => {
                info!(last_chkpt = index, "resuming from checkpoint");
                let snapshot: SamplerState<C::State> = self.store.load_state(index)?;
                snapshot.inner
            }
        };

        let mut chunks_run = 0;
        let mut last_chkpt = last;
        for index in self.plan.remaining(last) {
            if self.stop_requested() {
                info!(?last_chkpt, "stopping at checkpoint boundary");
                return Ok(RunOutcome::Interrupted {
                    last_chkpt,
                    chunks_run,
                });
            }
            state = self.run_chunk(index, &state)?;
            chunks_run += 1;
            last_chkpt = Some(index);
        }

        self.status = RunStatus::Complete;
        info!(
            total_chkpts = self.plan.total_chkpts,
            chunks_run, "run complete"
        );
        Ok(RunOutcome::Completed(self.summary(chunks_run)?))
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::SeqCst))
    }

    /// Record the configuration on the first invocation, compare against the
    /// recorded one on every later one. Returns the resume point.
    fn check_configuration(&mut self) -> Result<Option<u64>> {
        let last = self.store.last_checkpoint()?;
        match self.store.load_config()? {
            Some(recorded) => validate::check_restart(&recorded, &self.config)?,
            None if last.is_some() => {
                return Err(StorageError::MissingConfig {
                    path: self.config.path.clone(),
                }
                .into())
            }
            None => {
                self.store.store_config(&self.config)?;
                debug!(path = %self.config.path.display(), "recorded run configuration");
            }
        }
        Ok(last)
    }

    fn typical_set(&mut self) -> Result<C::State> {
        self.status = RunStatus::TypicalSet;
        info!(
            iterations = self.config.iter_typical,
            seed = self.config.seed,
            "running typical set"
        );
        let output = self
            .capability
            .run(SampleRequest {
                prior: None,
                phase: Phase::Warmup,
                num_iterations: self.config.iter_typical,
                seed: self.config.seed,
                chains: self.config.parallel_chains,
                threads_per_chain: self.config.threads_per,
                control: &self.config.control,
            })
            .map_err(|error| ChkptError::SamplerExecution {
                stage: Stage::TypicalSet,
                error,
            })?;
        if output.result.is_some() {
            warn!("discarding draws returned by the typical set");
        }
        Ok(output.state)
    }

    fn run_chunk(&mut self, index: u64, prior: &C::State) -> Result<C::State> {
        let phase = self.plan.phase(index);
        let seed = CheckpointPlan::seed_for(self.config.seed, index);
        self.status = match phase {
            Phase::Warmup => RunStatus::Warmup,
            Phase::Sample => RunStatus::Sampling,
        };

        let span = info_span!("checkpoint", index, %phase, seed);
        let _guard = span.enter();

        let output = self
            .capability
            .run(SampleRequest {
                prior: Some(prior),
                phase,
                num_iterations: self.plan.iter_per_chkpt,
                seed,
                chains: self.config.parallel_chains,
                threads_per_chain: self.config.threads_per,
                control: &self.config.control,
            })
            .map_err(|error| ChkptError::SamplerExecution {
                stage: Stage::Checkpoint(index),
                error,
            })?;

        match (phase, output.result) {
            (Phase::Sample, Some(mut result)) => {
                result.index = index;
                self.persist_result(&result)?;
            }
            (Phase::Sample, None) => {
                return Err(ChkptError::SamplerExecution {
                    stage: Stage::Checkpoint(index),
                    error: anyhow!("sampler returned no draws for a sampling checkpoint"),
                })
            }
            (Phase::Warmup, Some(_)) => warn!("discarding draws returned for a warmup checkpoint"),
            (Phase::Warmup, None) => {}
        }

        let snapshot = SamplerState {
            index,
            phase,
            inner: output.state,
        };
        self.store.store_state(&snapshot)?;
        info!("checkpoint persisted");

        if self.show_progress {
            self.progress
                .emit(&ProgressRecord::new(&self.plan, index, phase));
        }
        Ok(snapshot.inner)
    }

    /// Results are written before the state of their checkpoint. A crash in
    /// between leaves a result without a state, which the retried chunk
    /// reproduces exactly.
    fn persist_result(&mut self, result: &ChunkResult) -> Result<()> {
        if self.store.result_indices()?.contains(&result.index) {
            let existing = self.store.load_result(result.index)?;
            if existing != *result {
                return Err(StorageError::AlreadyExists {
                    kind: "differing chunk result",
                    index: result.index,
                }
                .into());
            }
            debug!("result of an interrupted attempt matches, keeping it");
            return Ok(());
        }
        self.store.store_result(result)?;
        Ok(())
    }

    fn summary(&self, chunks_run: u64) -> Result<RunSummary> {
        Ok(RunSummary {
            config: self.config.clone(),
            plan: self.plan,
            chunks_run,
            result_indices: self.store.result_indices()?,
        })
    }
}
