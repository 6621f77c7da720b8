use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{config::ControlOptions, plan::Phase};

/// Opaque sampler snapshot persisted after a checkpoint.
///
/// `inner` is whatever the sampler capability needs to continue, e.g.
/// adapted step sizes and the last position of every chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerState<S> {
    pub index: u64,
    pub phase: Phase,
    pub inner: S,
}

/// Retained draws of a single chain within one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainDraws {
    pub chain: u64,
    pub draws: Vec<Box<[f64]>>,
}

/// The retained draws of one sampling checkpoint, across all chains.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub index: u64,
    pub param_names: Vec<String>,
    pub chains: Vec<ChainDraws>,
}

impl ChunkResult {
    pub fn num_draws(&self) -> usize {
        self.chains.iter().map(|chain| chain.draws.len()).sum()
    }
}

/// Arguments of one sampler invocation.
#[derive(Debug)]
pub struct SampleRequest<'a, S> {
    /// `None` for the typical set bootstrap.
    pub prior: Option<&'a S>,
    pub phase: Phase,
    pub num_iterations: u64,
    pub seed: u64,
    pub chains: usize,
    pub threads_per_chain: usize,
    pub control: &'a ControlOptions,
}

pub struct ChunkOutput<S> {
    pub state: S,
    /// Draws of the chunk. Only sampling chunks keep them.
    pub result: Option<ChunkResult>,
}

/// The long running computation behind a checkpointed run.
///
/// One call advances all chains by `num_iterations`. The call has to be
/// deterministic given the prior state and the seed, otherwise a resumed
/// run can not reproduce an uninterrupted one.
pub trait SamplerCapability {
    type State: Clone + Serialize + DeserializeOwned;

    fn run(&mut self, request: SampleRequest<'_, Self::State>) -> Result<ChunkOutput<Self::State>>;
}

impl<T: SamplerCapability + ?Sized> SamplerCapability for &mut T {
    type State = T::State;

    fn run(&mut self, request: SampleRequest<'_, Self::State>) -> Result<ChunkOutput<Self::State>> {
        (**self).run(request)
    }
}
