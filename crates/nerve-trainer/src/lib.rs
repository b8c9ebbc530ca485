//! # Nerve Trainer
//!
//! Epoch loop with inverse-time learning-rate decay, dev-score driven
//! checkpointing, metric observers and the [`Ner`] entry point that ties
//! dataset loading, training and prediction together.

pub mod checkpoint;
pub mod config;
pub mod ner;
pub mod observer;
pub mod schedule;
pub mod trainer;

pub use checkpoint::{read_config, CheckpointSink, DirCheckpoint, SavedConfig};
pub use config::TrainConfig;
pub use ner::{Ner, TrainOptions};
pub use observer::{JsonlObserver, MemoryObserver, MetricsObserver, NoopObserver};
pub use schedule::InverseTimeDecay;
pub use trainer::{evaluate, EpochReport, Trainer, TrainingSummary, Validation};
