use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Result;
use nuts_checkpoint::{
    CheckpointStore, ChkptError, ChunkOutput, FsStore, LogDensity, LogpError, ProgressCallback,
    RandomWalkSampler, RunConfiguration, RunDriver, RunOutcome, RunRequest, RunSummary,
    SampleRequest, SamplerCapability, SamplerState,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use thiserror::Error;

struct NormalLogp {
    mu: Box<[f64]>,
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
            .map(|(&p, &mu)| -(p - mu) * (p - mu) / 2.)
            .sum())
    }

    fn param_names(&self) -> Vec<String> {
        (1..=self.mu.len()).map(|i| format!("mu[{}]", i)).collect()
    }
}

/// Counts sampler invocations of the wrapped capability.
struct Counting<C> {
    inner: C,
    calls: usize,
}

impl<C: SamplerCapability> SamplerCapability for Counting<C> {
    type State = C::State;

    fn run(&mut self, request: SampleRequest<'_, C::State>) -> Result<ChunkOutput<C::State>> {
        self.calls += 1;
        self.inner.run(request)
    }
}

fn sampler() -> Counting<RandomWalkSampler<NormalLogp>> {
    Counting {
        inner: RandomWalkSampler::new(NormalLogp {
            mu: vec![0.5, -1.0, 2.0].into(),
        }),
        calls: 0,
    }
}

fn request(path: &Path) -> RunRequest {
    let mut config = RunConfiguration::new("normal-3d", json!({"mu": [0.5, -1.0, 2.0]}), path);
    config.iter_warmup = 1000;
    config.iter_sampling = 1000;
    config.iter_per_chkpt = 250;
    config.iter_typical = 150;
    config.parallel_chains = 2;
    config.seed = 42;
    RunRequest {
        config,
        progress: false,
    }
}

fn snapshot_files(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    for dir in ["states", "results"] {
        for entry in fs::read_dir(root.join(dir)).unwrap() {
            let path = entry.unwrap().path();
            let contents = fs::read(&path).unwrap();
            files.insert(path.strip_prefix(root).unwrap().to_path_buf(), contents);
        }
    }
    files.insert(
        PathBuf::from("run_config.json"),
        fs::read(root.join("run_config.json")).unwrap(),
    );
    files
}

fn run(path: &Path) -> Result<RunOutcome, ChkptError> {
    let store = FsStore::open(path)?;
    RunDriver::new(request(path), sampler(), store)?.run()
}

#[test]
fn interrupted_run_matches_uninterrupted() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let straight = dir.path().join("straight");
    let resumed = dir.path().join("resumed");

    let outcome = run(&straight)?;
    assert!(matches!(
        outcome,
        RunOutcome::Completed(RunSummary { chunks_run: 8, .. })
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_inner = stop.clone();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let lines_inner = lines.clone();
    let mut req = request(&resumed);
    req.progress = true;
    let mut driver = RunDriver::new(req, sampler(), FsStore::open(&resumed)?)?
        .with_stop_signal(stop)
        .with_progress(ProgressCallback::new(move |record| {
            lines_inner.lock().unwrap().push(record.to_string());
            if record.index == 2 {
                stop_inner.store(true, Ordering::SeqCst);
            }
        }));
    let outcome = driver.run()?;
    assert_eq!(
        outcome,
        RunOutcome::Interrupted {
            last_chkpt: Some(2),
            chunks_run: 2
        }
    );
    let (sampler_used, store) = driver.into_parts();
    // Typical set plus two checkpoints
    assert_eq!(sampler_used.calls, 3);
    assert!(store.result_indices()?.is_empty());
    assert_eq!(
        *lines.lock().unwrap(),
        vec![
            "Chkpt: 1 / 8; Iteration: 250 / 2000 (warmup)",
            "Chkpt: 2 / 8; Iteration: 500 / 2000 (warmup)",
        ]
    );

    let mut driver = RunDriver::new(request(&resumed), sampler(), FsStore::open(&resumed)?)?;
    let RunOutcome::Completed(summary) = driver.run()? else {
        panic!("resumed run did not complete");
    };
    assert_eq!(summary.chunks_run, 6);
    assert_eq!(summary.result_indices, vec![5, 6, 7, 8]);
    let (sampler_used, resumed_store) = driver.into_parts();
    assert_eq!(sampler_used.calls, 6);

    let straight_store = FsStore::open(&straight)?;
    assert_eq!(resumed_store.state_indices()?, (1..=8).collect::<Vec<_>>());
    for index in 1..=8 {
        assert_eq!(
            fs::read(resumed_store.state_path(index))?,
            fs::read(straight_store.state_path(index))?
        );
    }
    for index in 5..=8 {
        let result = resumed_store.load_result(index)?;
        assert_eq!(result, straight_store.load_result(index)?);
        assert_eq!(result.param_names, vec!["mu[1]", "mu[2]", "mu[3]"]);
        assert_eq!(result.num_draws(), 2 * 250);
    }

    let last: SamplerState<serde_json::Value> = resumed_store.load_state(8)?;
    assert_eq!(last.index, 8);
    Ok(())
}

#[test]
fn completed_run_is_left_alone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    run(dir.path())?;
    let before = snapshot_files(dir.path());

    let mut driver = RunDriver::new(request(dir.path()), sampler(), FsStore::open(dir.path())?)?;
    let outcome = driver.run()?;
    assert!(matches!(outcome, RunOutcome::AlreadyComplete(_)));
    assert_eq!(driver.into_parts().0.calls, 0);
    assert_eq!(snapshot_files(dir.path()), before);
    Ok(())
}

#[test]
fn changed_schedule_is_rejected_without_touching_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stop = Arc::new(AtomicBool::new(false));
    let stop_inner = stop.clone();
    let mut req = request(dir.path());
    req.progress = true;
    RunDriver::new(req, sampler(), FsStore::open(dir.path())?)?
        .with_stop_signal(stop)
        .with_progress(ProgressCallback::new(move |record| {
            if record.index == 5 {
                stop_inner.store(true, Ordering::SeqCst);
            }
        }))
        .run()?;
    let before = snapshot_files(dir.path());

    let mut req = request(dir.path());
    req.config.iter_per_chkpt = 200;
    let mut driver = RunDriver::new(req, sampler(), FsStore::open(dir.path())?)?;
    let err = driver.run().unwrap_err();
    assert!(
        matches!(&err, ChkptError::RestartConsistency { mismatches, .. } if mismatches.len() == 1),
        "unexpected error {}",
        err
    );
    assert!(err.to_string().contains("iter_per_chkpt: recorded 250, requested 200"));
    assert_eq!(driver.into_parts().0.calls, 0);
    assert_eq!(snapshot_files(dir.path()), before);
    Ok(())
}

#[test]
fn indivisible_schedule_never_samples() {
    let dir = tempfile::tempdir().unwrap();
    let mut req = request(dir.path());
    req.config.iter_per_chkpt = 300;
    let result = RunDriver::new(req, sampler(), FsStore::open(dir.path()).unwrap());
    assert!(matches!(result, Err(ChkptError::Configuration(_))));
}

#[test]
fn run_from_toml_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let run_dir = dir.path().join("fit");
    let config_file = dir.path().join("chkpt.toml");
    fs::write(
        &config_file,
        format!(
            r#"
            model = "normal-3d"
            iter_warmup = 200
            iter_sampling = 300
            iter_per_chkpt = 100
            iter_typical = 50
            parallel_chains = 2
            threads_per = 2
            seed = 9
            path = {:?}
            progress = false

            [data]
            mu = [0.5, -1.0, 2.0]
            "#,
            run_dir.to_str().unwrap()
        ),
    )?;

    let request = RunRequest::load(&config_file)?;
    assert_eq!(request.config.path, run_dir);
    let store = FsStore::open(&request.config.path)?;
    let outcome = RunDriver::new(request, sampler(), store)?.run()?;
    let RunOutcome::Completed(summary) = outcome else {
        panic!("run did not complete");
    };
    assert_eq!(summary.plan.warmup_chkpts, 2);
    assert_eq!(summary.plan.total_chkpts, 5);
    assert_eq!(summary.result_indices, vec![3, 4, 5]);
    Ok(())
}
