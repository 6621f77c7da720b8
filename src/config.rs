use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ChkptError, Result};

/// Sampler tuning knobs forwarded to the sampler capability unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlOptions {
    /// Target acceptance statistic during adaptation.
    pub adapt_delta: f64,
    /// The maximum tree depth of a NUTS trajectory. Samplers without
    /// trajectories ignore it.
    pub max_treedepth: u64,
    /// Initial step size before adaptation.
    pub step_size: f64,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            adapt_delta: 0.8,
            max_treedepth: 10,
            step_size: 1.0,
        }
    }
}

/// Everything that determines the outcome of a checkpointed run.
///
/// The configuration is recorded next to the checkpoints on the first
/// invocation, and every later invocation against the same path has to
/// present an identical one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Identifier of the compiled model, e.g. a path or a content hash.
    pub model: String,
    /// Model data. Has to be a JSON object.
    pub data: serde_json::Value,
    pub iter_warmup: u64,
    pub iter_sampling: u64,
    pub iter_per_chkpt: u64,
    /// Length of the non-checkpointed typical set phase.
    pub iter_typical: u64,
    pub parallel_chains: usize,
    pub threads_per: usize,
    pub seed: u64,
    #[serde(default)]
    pub control: ControlOptions,
    /// Directory holding the checkpoints of this run.
    pub path: PathBuf,
}

impl RunConfiguration {
    pub fn new(
        model: impl Into<String>,
        data: serde_json::Value,
        path: impl AsRef<Path>,
    ) -> Self {
        Self {
            model: model.into(),
            data,
            iter_warmup: 1000,
            iter_sampling: 1000,
            iter_per_chkpt: 100,
            iter_typical: 150,
            parallel_chains: 2,
            threads_per: 1,
            seed: 1,
            control: ControlOptions::default(),
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Check the shape of the configuration.
    ///
    /// Divisibility of the iteration counts is checked by
    /// [`CheckpointPlan`](crate::CheckpointPlan), not here.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ChkptError::InputType("model must not be empty".into()));
        }
        if !self.data.is_object() {
            return Err(ChkptError::InputType(format!(
                "data must be a structured object of named values, got {}",
                json_kind(&self.data)
            )));
        }
        match self.path.to_str() {
            None => {
                return Err(ChkptError::InputType(format!(
                    "path {:?} is not valid UTF-8",
                    self.path
                )))
            }
            Some("") => return Err(ChkptError::InputType("path must not be empty".into())),
            Some(_) => {}
        }
        if self.parallel_chains == 0 {
            return Err(ChkptError::InputType(
                "parallel_chains must be at least 1".into(),
            ));
        }
        if self.threads_per == 0 {
            return Err(ChkptError::InputType("threads_per must be at least 1".into()));
        }
        if !(self.control.adapt_delta > 0.0 && self.control.adapt_delta < 1.0) {
            return Err(ChkptError::InputType(
                "control.adapt_delta must be in (0, 1)".into(),
            ));
        }
        if !(self.control.step_size > 0.0 && self.control.step_size.is_finite()) {
            return Err(ChkptError::InputType(
                "control.step_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn default_progress() -> bool {
    true
}

/// A run configuration together with the display-only settings of one
/// invocation.
///
/// Loadable from TOML:
///
/// ```toml
/// model = "models/normal.stan"
/// data = { N = 3, y = [0.1, -0.3, 1.2] }
/// iter_warmup = 1000
/// iter_sampling = 1000
/// iter_per_chkpt = 250
/// iter_typical = 150
/// parallel_chains = 4
/// threads_per = 1
/// seed = 42
/// path = "fits/normal"
/// progress = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(flatten)]
    pub config: RunConfiguration,
    /// Print a progress line after every checkpoint. Never compared on
    /// restart.
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl RunRequest {
    pub fn new(config: RunConfiguration) -> Self {
        Self {
            config,
            progress: true,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let request: RunRequest =
            toml::from_str(text).map_err(|err| ChkptError::InputType(err.message().to_string()))?;
        request.config.validate()?;
        Ok(request)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            crate::storage::StorageError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_toml_str(&text)
    }
}

impl From<RunConfiguration> for RunRequest {
    fn from(config: RunConfiguration) -> Self {
        RunRequest::new(config)
    }
}
