//! A random walk Metropolis sampler behind the [`SamplerCapability`]
//! interface.
//!
//! Every chain owns its position and a dual averaging step size adapter.
//! Step sizes adapt during the typical set and warmup and are frozen at
//! their averaged value while sampling.

use anyhow::{bail, Context, Result};
use rand::{distr::Uniform, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::{prelude::*, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    config::ControlOptions,
    model::{LogDensity, LogpError},
    plan::Phase,
    sampler::{ChainDraws, ChunkOutput, ChunkResult, SampleRequest, SamplerCapability},
    stepsize::{DualAverage, DualAverageSettings},
};

const MAX_INIT_TRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    pub chain: u64,
    pub position: Vec<f64>,
    pub step_size: DualAverage,
}

/// Everything needed to continue all chains after a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RwmState {
    pub chains: Vec<ChainState>,
}

pub struct RandomWalkSampler<F> {
    logp: F,
}

impl<F: LogDensity> RandomWalkSampler<F> {
    pub fn new(logp: F) -> Self {
        Self { logp }
    }

    pub fn logp(&self) -> &F {
        &self.logp
    }
}

fn chain_rng(seed: u64, chain: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chain);
    rng
}

/// Log density at `position`, with recoverable failures mapped to zero
/// density.
fn eval<F: LogDensity>(logp: &F, position: &[f64]) -> Result<f64> {
    match logp.logp(position) {
        Ok(value) if value.is_nan() => Ok(f64::NEG_INFINITY),
        Ok(value) => Ok(value),
        Err(err) if err.is_recoverable() => Ok(f64::NEG_INFINITY),
        Err(err) => Err(anyhow::Error::new(err)).context("Logp function returned unrecoverable error"),
    }
}

/// Draw a starting point uniformly from (-2, 2) in every dimension.
fn init_chain<F: LogDensity, R: Rng + ?Sized>(
    logp: &F,
    chain: u64,
    control: &ControlOptions,
    rng: &mut R,
) -> Result<ChainState> {
    let dist = Uniform::new(-2f64, 2f64).context("Invalid initialization range")?;
    let mut position = vec![0f64; logp.dim()];
    for _ in 0..MAX_INIT_TRIES {
        for x in position.iter_mut() {
            *x = dist.sample(rng);
        }
        if eval(logp, &position)?.is_finite() {
            let settings = DualAverageSettings {
                target: control.adapt_delta,
                ..Default::default()
            };
            return Ok(ChainState {
                chain,
                position,
                step_size: DualAverage::new(settings, control.step_size),
            });
        }
    }
    bail!(
        "All {} initialization points of chain {} had zero density",
        MAX_INIT_TRIES,
        chain
    )
}

fn advance_chain<F: LogDensity, R: Rng + ?Sized>(
    logp: &F,
    state: &mut ChainState,
    iterations: u64,
    phase: Phase,
    rng: &mut R,
) -> Result<Vec<Box<[f64]>>> {
    let adapt = phase == Phase::Warmup;
    let mut draws = Vec::new();
    let mut current = eval(logp, &state.position)?;
    let mut proposal = vec![0f64; state.position.len()];

    for _ in 0..iterations {
        let step = if adapt {
            state.step_size.current_step_size()
        } else {
            state.step_size.current_step_size_adapt()
        };
        for (new, old) in proposal.iter_mut().zip(state.position.iter()) {
            let noise: f64 = StandardNormal.sample(rng);
            *new = old + step * noise;
        }
        let proposed = eval(logp, &proposal)?;
        let accept_prob = (proposed - current).min(0.).exp();
        let accept_prob = if accept_prob.is_nan() { 0. } else { accept_prob };

        if rng.random::<f64>() < accept_prob {
            state.position.copy_from_slice(&proposal);
            current = proposed;
        }
        if adapt {
            state.step_size.advance(accept_prob);
        } else {
            draws.push(state.position.clone().into());
        }
    }
    Ok(draws)
}

impl<F: LogDensity> SamplerCapability for RandomWalkSampler<F> {
    type State = RwmState;

    fn run(&mut self, request: SampleRequest<'_, RwmState>) -> Result<ChunkOutput<RwmState>> {
        let logp = &self.logp;
        let pool = ThreadPoolBuilder::new()
            .num_threads(request.chains * request.threads_per_chain)
            .thread_name(|i| format!("chkpt-worker-{}", i))
            .build()
            .context("Could not start thread pool")?;

        let prior = match request.prior {
            Some(prior) => {
                if prior.chains.len() != request.chains {
                    bail!(
                        "Snapshot holds {} chains but {} were requested",
                        prior.chains.len(),
                        request.chains
                    );
                }
                Some(prior.chains.as_slice())
            }
            None => None,
        };

        let (phase, seed, iterations, control) = (
            request.phase,
            request.seed,
            request.num_iterations,
            request.control,
        );
        let chains: Vec<(ChainState, Vec<Box<[f64]>>)> = pool.install(|| {
            (0..request.chains as u64)
                .into_par_iter()
                .map(|chain| {
                    let mut rng = chain_rng(seed, chain);
                    let mut state = match prior {
                        Some(prior) => prior[chain as usize].clone(),
                        None => init_chain(logp, chain, control, &mut rng)?,
                    };
                    let draws = advance_chain(logp, &mut state, iterations, phase, &mut rng)
                        .with_context(|| format!("Chain {} failed", chain))?;
                    Ok((state, draws))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let (states, draws): (Vec<_>, Vec<_>) = chains.into_iter().unzip();
        let result = (phase == Phase::Sample).then(|| ChunkResult {
            index: 0,
            param_names: logp.param_names(),
            chains: states
                .iter()
                .zip(draws)
                .map(|(state, draws)| ChainDraws {
                    chain: state.chain,
                    draws,
                })
                .collect(),
        });

        Ok(ChunkOutput {
            state: RwmState { chains: states },
            result,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_logps {
    use thiserror::Error;

    use crate::model::{LogDensity, LogpError};

    #[derive(Clone, Debug)]
    pub struct NormalLogp {
        pub dim: usize,
        pub mu: f64,
    }

    #[derive(Error, Debug)]
    pub enum NormalLogpError {}

    impl LogpError for NormalLogpError {
        fn is_recoverable(&self) -> bool {
            false
        }
    }

    impl LogDensity for NormalLogp {
        type LogpError = NormalLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn logp(&self, position: &[f64]) -> Result<f64, NormalLogpError> {
            Ok(position
                .iter()
                .map(|&x| -(x - self.mu) * (x - self.mu) / 2.)
                .sum())
        }
    }

    #[derive(Error, Debug)]
    #[error("Density is undefined at the boundary")]
    pub struct BoundaryError;

    impl LogpError for BoundaryError {
        fn is_recoverable(&self) -> bool {
            false
        }
    }

    /// Fails once a chain wanders beyond `limit`.
    pub struct BoundedLogp {
        pub limit: f64,
    }

    impl LogDensity for BoundedLogp {
        type LogpError = BoundaryError;

        fn dim(&self) -> usize {
            1
        }

        fn logp(&self, position: &[f64]) -> Result<f64, BoundaryError> {
            if position[0].abs() > self.limit {
                return Err(BoundaryError);
            }
            Ok(0.)
        }
    }
}
