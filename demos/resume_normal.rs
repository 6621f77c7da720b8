//! Sample a normal distribution in checkpoints.
//!
//! Run it twice with `STOP_AFTER=3` the first time to see the second
//! invocation pick up after checkpoint 3:
//!
//! ```text
//! STOP_AFTER=3 cargo run --example resume_normal -- /tmp/normal-fit
//! cargo run --example resume_normal -- /tmp/normal-fit
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use nuts_checkpoint::{
    FsStore, LogDensity, LogpError, ProgressCallback, RandomWalkSampler, RunConfiguration,
    RunDriver, RunOutcome, RunRequest,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

struct NormalLogp {
    mu: Vec<f64>,
}

#[derive(Error, Debug)]
enum NormalLogpError {}

impl LogpError for NormalLogpError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

impl LogDensity for NormalLogp {
    type LogpError = NormalLogpError;

    fn dim(&self) -> usize {
        self.mu.len()
    }

    fn logp(&self, position: &[f64]) -> Result<f64, NormalLogpError> {
        Ok(position
            .iter()
            .zip(self.mu.iter())
            .map(|(x, mu)| -(x - mu) * (x - mu) / 2.)
            .sum())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "normal-fit".to_string());
    let stop_after: Option<u64> = std::env::var("STOP_AFTER")
        .ok()
        .map(|value| value.parse())
        .transpose()
        .context("STOP_AFTER has to be a checkpoint number")?;

    let mu = vec![0.5, -1.0, 2.0];
    let mut config = RunConfiguration::new("normal-3d", serde_json::json!({ "mu": mu }), &path);
    config.iter_warmup = 1000;
    config.iter_sampling = 1000;
    config.iter_per_chkpt = 250;
    config.parallel_chains = 4;
    config.seed = 42;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_inner = stop.clone();
    let store = FsStore::open(&path)?;
    let mut driver = RunDriver::new(RunRequest::new(config), RandomWalkSampler::new(NormalLogp { mu }), store)?
        .with_stop_signal(stop)
        .with_progress(ProgressCallback::new(move |record| {
            println!("{}", record);
            if Some(record.index) == stop_after {
                stop_inner.store(true, Ordering::SeqCst);
            }
        }));

    match driver.run()? {
        RunOutcome::Completed(summary) => println!(
            "Sampling complete: {} chunks run, draws in {} result files",
            summary.chunks_run,
            summary.result_indices.len()
        ),
        RunOutcome::AlreadyComplete(_) => println!("Sampling already complete at {}", path),
        RunOutcome::Interrupted { last_chkpt, .. } => {
            println!("Stopped after checkpoint {:?}, run again to resume", last_chkpt)
        }
    }
    Ok(())
}
