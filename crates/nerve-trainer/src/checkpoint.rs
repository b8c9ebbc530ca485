//! Model persistence: `config.json` plus `model.safetensors` in one directory.

use std::fs;
use std::path::{Path, PathBuf};

use nerve_core::{BiLstmCrf, ModelConfig, Result, Vocab};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Everything besides the weights needed to rebuild a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedConfig {
    pub model: ModelConfig,
    pub word_vocab: Vocab,
    pub tag_vocab: Vocab,
}

/// Destination for model snapshots taken during training.
pub trait CheckpointSink<M: ?Sized> {
    fn save(&mut self, model: &M, epoch: usize) -> Result<()>;
}

/// Writes snapshots into a directory, replacing the previous one.
#[derive(Debug, Clone)]
pub struct DirCheckpoint {
    dir: PathBuf,
    config: SavedConfig,
    last_epoch: Option<usize>,
}

impl DirCheckpoint {
    pub fn new(dir: impl Into<PathBuf>, config: SavedConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            last_epoch: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Epoch of the most recent successful save.
    pub fn last_epoch(&self) -> Option<usize> {
        self.last_epoch
    }
}

impl CheckpointSink<BiLstmCrf> for DirCheckpoint {
    fn save(&mut self, model: &BiLstmCrf, epoch: usize) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let config = serde_json::to_vec_pretty(&self.config)?;
        write_atomic(&self.dir.join(CONFIG_FILE), |tmp| {
            fs::write(tmp, &config)?;
            Ok(())
        })?;
        write_atomic(&self.dir.join(WEIGHTS_FILE), |tmp| model.save_weights(tmp))?;

        self.last_epoch = Some(epoch);
        debug!(dir = %self.dir.display(), epoch, "checkpoint written");
        Ok(())
    }
}

/// Read the saved configuration from a checkpoint directory.
pub fn read_config<P: AsRef<Path>>(dir: P) -> Result<SavedConfig> {
    let bytes = fs::read(dir.as_ref().join(CONFIG_FILE))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write through `write` into a sibling temp file, then rename over `path`.
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
