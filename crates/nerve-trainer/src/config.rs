//! Training run configuration.

use std::path::PathBuf;

use nerve_core::{ModelConfig, NerveError, Result, ScoreMetric};
use serde::{Deserialize, Serialize};

/// Default directory for checkpoints.
pub const DEFAULT_SAVE_PATH: &str = "./saves";

/// Hyperparameters and settings for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Base learning rate.
    pub lr: f64,
    /// Inverse-time decay factor applied after every epoch.
    pub lr_decay: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for weight initialization and batch shuffling.
    pub seed: u64,
    /// Minimum count for a word to enter the vocabulary.
    pub min_freq: usize,
    /// Directory receiving `config.json` and `model.safetensors`.
    pub save_path: PathBuf,
    /// Validation metric used to pick checkpoints.
    pub metric: ScoreMetric,
    /// Network shape; vocabulary sizes are filled in from the data.
    pub model: ModelConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            lr_decay: 0.05,
            epochs: 300,
            batch_size: 128,
            seed: 2019,
            min_freq: 1,
            save_path: PathBuf::from(DEFAULT_SAVE_PATH),
            metric: ScoreMetric::F1,
            model: ModelConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_lr_decay(mut self, lr_decay: f64) -> Self {
        self.lr_decay = lr_decay;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_save_path(mut self, save_path: impl Into<PathBuf>) -> Self {
        self.save_path = save_path.into();
        self
    }

    pub fn with_metric(mut self, metric: ScoreMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Check run-level settings; the network shape is validated once the
    /// vocabularies are known.
    pub fn validate(&self) -> Result<()> {
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(NerveError::InvalidConfig(format!("lr must be > 0, got {}", self.lr)));
        }
        if !(self.lr_decay >= 0.0 && self.lr_decay.is_finite()) {
            return Err(NerveError::InvalidConfig(format!(
                "lr_decay must be >= 0, got {}",
                self.lr_decay
            )));
        }
        if self.batch_size == 0 {
            return Err(NerveError::InvalidConfig("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainConfig::default();
        assert_eq!(config.lr, 0.01);
        assert_eq!(config.lr_decay, 0.05);
        assert_eq!(config.epochs, 300);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.seed, 2019);
        assert_eq!(config.save_path, PathBuf::from("./saves"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = TrainConfig::new()
            .with_lr(0.1)
            .with_epochs(3)
            .with_batch_size(2)
            .with_save_path("/tmp/model");
        assert_eq!(config.lr, 0.1);
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.save_path, PathBuf::from("/tmp/model"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(TrainConfig::new().with_lr(0.0).validate().is_err());
        assert!(TrainConfig::new().with_lr_decay(-1.0).validate().is_err());
        assert!(TrainConfig::new().with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: TrainConfig = serde_json::from_str(r#"{"epochs": 5, "model": {"num_layers": 1}}"#).unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.lr, 0.01);
        assert_eq!(config.model.num_layers, 1);
        assert_eq!(config.model.hidden_dim, 300);
    }
}
