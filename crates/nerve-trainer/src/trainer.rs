//! Training loop with per-epoch validation and checkpointing.

use candle_core::DType;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use nerve_core::{BatchIterator, Result, Scorer, SequenceTagger, TaggedExample, TrainableTagger};
use tracing::{debug, info};

use crate::checkpoint::CheckpointSink;
use crate::config::TrainConfig;
use crate::observer::{MetricsObserver, NoopObserver};
use crate::schedule::InverseTimeDecay;

/// Dev examples and the scorer that rates the model on each of them.
#[derive(Clone, Copy)]
pub struct Validation<'a> {
    pub examples: &'a [TaggedExample],
    pub scorer: &'a dyn Scorer,
}

/// What happened during one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Sum of the batch losses.
    pub loss: f64,
    /// Rate used while training this epoch.
    pub learning_rate: f64,
    pub dev_score: Option<f64>,
    pub saved: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochReport>,
    /// Best dev score that triggered a save, if any.
    pub best_score: Option<f64>,
    pub best_epoch: Option<usize>,
}

/// Mean per-example score; an empty set scores 0.0.
pub fn evaluate(model: &dyn SequenceTagger, examples: &[TaggedExample], scorer: &dyn Scorer) -> Result<f64> {
    if examples.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for example in examples {
        total += scorer.score(model, example)?;
    }
    Ok(total / examples.len() as f64)
}

/// Drives epochs of optimization over a [`TrainableTagger`].
pub struct Trainer<O = NoopObserver> {
    schedule: InverseTimeDecay,
    epochs: usize,
    observer: O,
}

impl Trainer<NoopObserver> {
    pub fn new(config: &TrainConfig) -> Self {
        Self {
            schedule: InverseTimeDecay::new(config.lr, config.lr_decay),
            epochs: config.epochs,
            observer: NoopObserver,
        }
    }
}

impl<O: MetricsObserver> Trainer<O> {
    /// Replace the metrics observer.
    pub fn with_observer<P: MetricsObserver>(self, observer: P) -> Trainer<P> {
        Trainer {
            schedule: self.schedule,
            epochs: self.epochs,
            observer,
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// Train for the configured number of epochs.
    ///
    /// With `validation`, a snapshot is saved only when the dev score strictly
    /// beats the best so far (starting from 0.0). Without it, every epoch is
    /// saved. Any error stops training and is returned as is.
    pub fn fit<M, C>(
        &mut self,
        model: &mut M,
        batches: &BatchIterator,
        validation: Option<Validation<'_>>,
        checkpoint: &mut C,
    ) -> Result<TrainingSummary>
    where
        M: TrainableTagger,
        C: CheckpointSink<M> + ?Sized,
    {
        let mut optimizer = AdamW::new(
            model.trainable_vars()?,
            ParamsAdamW {
                lr: self.schedule.base_lr(),
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let mut summary = TrainingSummary::default();
        let mut best_score = 0.0;
        let mut learning_rate = self.schedule.base_lr();

        for epoch in 0..self.epochs {
            model.set_training(true);

            let mut acc_loss = 0.0;
            for (step, batch) in batches.epoch(epoch).iter().enumerate() {
                let loss = model.compute_loss(batch)?;
                let value = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
                acc_loss += value;
                optimizer.backward_step(&loss)?;
                debug!(epoch, step, loss = value, "batch");
            }
            info!(epoch, loss = acc_loss, "epoch finished");
            self.observer.add_scalar("loss", acc_loss, epoch)?;

            let (dev_score, saved) = match validation {
                Some(Validation { examples, scorer }) => {
                    model.set_training(false);
                    let score = evaluate(&*model, examples, scorer)?;
                    info!(epoch, score, "dev score");
                    self.observer.add_scalar("score", score, epoch)?;

                    let improved = score > best_score;
                    if improved {
                        best_score = score;
                        checkpoint.save(model, epoch)?;
                        summary.best_score = Some(score);
                        summary.best_epoch = Some(epoch);
                        info!(epoch, score, "higher dev score, model saved");
                    }
                    (Some(score), improved)
                }
                None => {
                    checkpoint.save(model, epoch)?;
                    info!(epoch, "model saved");
                    (None, true)
                }
            };

            summary.epochs.push(EpochReport {
                epoch,
                loss: acc_loss,
                learning_rate,
                dev_score,
                saved,
            });

            learning_rate = self.schedule.rate_after_epoch(epoch);
            optimizer.set_learning_rate(learning_rate);
        }

        model.set_training(false);
        self.observer.flush()?;
        Ok(summary)
    }
}
