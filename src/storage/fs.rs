use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use super::csv::{read_result, write_result};
use super::{CheckpointStore, StorageError};
use crate::{
    config::RunConfiguration,
    sampler::{ChunkResult, SamplerState},
};

const CONFIG_FILE: &str = "run_config.json";
const STATE_DIR: &str = "states";
const RESULT_DIR: &str = "results";
const STATE_PREFIX: &str = "state_";
const RESULT_PREFIX: &str = "result_";

/// Checkpoint store in a directory on disk.
///
/// ```text
/// <root>/run_config.json
/// <root>/states/state_0000001.json
/// <root>/results/result_0000005.csv
/// ```
///
/// Files are written to a hidden temporary next to their final name,
/// synced, and then hard linked into place. A crash leaves at most a stray
/// temporary behind, which listing ignores, never a truncated checkpoint.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FsStore {
    /// Open the store at `root`, creating its directories if necessary.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        for dir in [STATE_DIR, RESULT_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(io_err(&path))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn state_path(&self, index: u64) -> PathBuf {
        self.root
            .join(STATE_DIR)
            .join(format!("{}{:07}.json", STATE_PREFIX, index))
    }

    pub fn result_path(&self, index: u64) -> PathBuf {
        self.root
            .join(RESULT_DIR)
            .join(format!("{}{:07}.csv", RESULT_PREFIX, index))
    }

    fn list(&self, dir: &str, prefix: &str, extension: &str) -> Result<Vec<u64>, StorageError> {
        let dir = self.root.join(dir);
        let mut indices = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Only names this store would write itself count
            let index = name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(extension))
                .and_then(|digits| digits.parse::<u64>().ok())
                .filter(|index| format!("{}{:07}{}", prefix, index, extension) == name);
            match index {
                Some(index) => indices.push(index),
                None => tracing::debug!(file = name, "ignoring unrelated file in checkpoint store"),
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Write `path` exactly once.
    ///
    /// Fails with `AlreadyExists` if `path` is present, also when another
    /// writer created it between our check and the link.
    fn write_once(
        &self,
        path: &Path,
        kind: &'static str,
        index: u64,
        contents: &[u8],
    ) -> Result<(), StorageError> {
        if path.exists() {
            return Err(StorageError::AlreadyExists { kind, index });
        }
        let tmp_path = temporary_path(path);
        let result = write_file(&tmp_path, contents).and_then(|()| {
            fs::hard_link(&tmp_path, path).map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists { kind, index }
                } else {
                    StorageError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                }
            })
        });
        let _ = fs::remove_file(&tmp_path);
        result?;
        sync_parent(path)?;
        tracing::debug!(path = %path.display(), "stored {}", kind);
        Ok(())
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut file = File::create(path).map_err(io_err(path))?;
    file.write_all(contents).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) => File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(io_err(parent)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    serde_json::from_str(&text).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn to_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

impl CheckpointStore for FsStore {
    fn location(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn load_config(&self) -> Result<Option<RunConfiguration>, StorageError> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn store_config(&mut self, config: &RunConfiguration) -> Result<(), StorageError> {
        let path = self.config_path();
        let contents = to_json(&path, config)?;
        self.write_once(&path, "run configuration", 0, &contents)
    }

    fn state_indices(&self) -> Result<Vec<u64>, StorageError> {
        self.list(STATE_DIR, STATE_PREFIX, ".json")
    }

    fn result_indices(&self) -> Result<Vec<u64>, StorageError> {
        self.list(RESULT_DIR, RESULT_PREFIX, ".csv")
    }

    fn load_state<S: DeserializeOwned>(&self, index: u64) -> Result<SamplerState<S>, StorageError> {
        let path = self.state_path(index);
        if !path.exists() {
            return Err(StorageError::Missing {
                kind: "sampler state",
                index,
            });
        }
        read_json(&path)
    }

    fn store_state<S: Serialize>(&mut self, state: &SamplerState<S>) -> Result<(), StorageError> {
        let path = self.state_path(state.index);
        let contents = to_json(&path, state)?;
        self.write_once(&path, "sampler state", state.index, &contents)
    }

    fn load_result(&self, index: u64) -> Result<ChunkResult, StorageError> {
        let path = self.result_path(index);
        if !path.exists() {
            return Err(StorageError::Missing {
                kind: "chunk result",
                index,
            });
        }
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        read_result(&path, index, &text)
    }

    fn store_result(&mut self, result: &ChunkResult) -> Result<(), StorageError> {
        let path = self.result_path(result.index);
        let mut contents = Vec::new();
        write_result(&mut contents, result).map_err(io_err(&path))?;
        self.write_once(&path, "chunk result", result.index, &contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{plan::Phase, sampler::ChainDraws};
    use pretty_assertions::assert_eq;

    fn state(index: u64) -> SamplerState<Vec<f64>> {
        SamplerState {
            index,
            phase: Phase::Warmup,
            inner: vec![0.1 * index as f64, -1.5],
        }
    }

    #[test]
    fn empty_store_has_no_resume_point() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().join("run")).unwrap();
        assert_eq!(store.last_checkpoint().unwrap(), None);
        assert!(store.load_config().unwrap().is_none());
    }

    #[test]
    fn resume_point_is_highest_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        for index in [3, 1, 12, 2] {
            store.store_state(&state(index)).unwrap();
        }
        assert_eq!(store.state_indices().unwrap(), vec![1, 2, 3, 12]);
        assert_eq!(store.last_checkpoint().unwrap(), Some(12));
        let loaded: SamplerState<Vec<f64>> = store.load_state(3).unwrap();
        assert_eq!(loaded, state(3));
    }

    #[test]
    fn states_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        store.store_state(&state(1)).unwrap();
        let before = fs::read(store.state_path(1)).unwrap();

        let mut other = state(1);
        other.inner = vec![42.0];
        let err = store.store_state(&other).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { index: 1, .. }));
        assert_eq!(fs::read(store.state_path(1)).unwrap(), before);
    }

    #[test]
    fn temporaries_are_not_resume_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        store.store_state(&state(1)).unwrap();
        // What a crash in the middle of writing checkpoint 2 leaves behind
        let tmp = temporary_path(&store.state_path(2));
        fs::write(&tmp, "{\"index\": 2, \"pha").unwrap();

        assert_eq!(store.last_checkpoint().unwrap(), Some(1));
        assert!(matches!(
            store.load_state::<Vec<f64>>(2),
            Err(StorageError::Missing { index: 2, .. })
        ));
    }

    #[test]
    fn foreign_file_names_are_not_resume_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        store.store_state(&state(1)).unwrap();
        for name in ["state_9.json", "state_+0000009.json", "state_00000009.json"] {
            fs::write(dir.path().join(STATE_DIR).join(name), "{}").unwrap();
        }
        assert_eq!(store.state_indices().unwrap(), vec![1]);
        assert_eq!(store.last_checkpoint().unwrap(), Some(1));
    }

    #[test]
    fn matrix_parameter_names_survive_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        let result = ChunkResult {
            index: 5,
            param_names: vec!["theta[1,1]".into(), "theta[1,2]".into()],
            chains: vec![ChainDraws {
                chain: 0,
                draws: vec![vec![0.5, -0.5].into()],
            }],
        };
        store.store_result(&result).unwrap();
        assert_eq!(store.load_result(5).unwrap(), result);
    }

    #[test]
    fn results_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        let result = ChunkResult {
            index: 5,
            param_names: vec!["x.0".into()],
            chains: vec![ChainDraws {
                chain: 0,
                draws: vec![vec![0.25].into(), vec![-1.0 / 3.0].into()],
            }],
        };
        store.store_result(&result).unwrap();
        assert_eq!(store.result_indices().unwrap(), vec![5]);
        assert_eq!(store.load_result(5).unwrap(), result);
        assert!(matches!(
            store.store_result(&result),
            Err(StorageError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn config_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::open(dir.path()).unwrap();
        let config = RunConfiguration::new("normal", serde_json::json!({"N": 1}), dir.path());
        store.store_config(&config).unwrap();
        assert_eq!(store.load_config().unwrap(), Some(config.clone()));
        assert!(store.store_config(&config).is_err());
    }
}
