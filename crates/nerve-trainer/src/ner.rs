//! End-to-end entry point: train, load, predict and test.

use std::path::{Path, PathBuf};

use candle_core::Device;
use nerve_core::spans::{decode_spans, Entity, Span};
use nerve_core::vocab::PAD_TOKEN;
use nerve_core::{
    load_conll, vectors, BatchIterator, BiLstmCrf, ModelConfig, NerveError, Result, ScoreMetric,
    SequenceTagger, TagScorer, Tokenizer, Vocab,
};
use tracing::info;

use crate::checkpoint::{read_config, DirCheckpoint, SavedConfig, WEIGHTS_FILE};
use crate::config::TrainConfig;
use crate::observer::{MetricsObserver, NoopObserver};
use crate::trainer::{evaluate, Trainer, TrainingSummary, Validation};

/// Inputs for one training run.
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    pub train_path: PathBuf,
    pub dev_path: Option<PathBuf>,
    /// Whitespace-separated pretrained word vectors.
    pub vectors_path: Option<PathBuf>,
    pub config: TrainConfig,
}

impl TrainOptions {
    pub fn new(train_path: impl Into<PathBuf>) -> Self {
        Self {
            train_path: train_path.into(),
            ..Default::default()
        }
    }

    pub fn with_dev(mut self, dev_path: impl Into<PathBuf>) -> Self {
        self.dev_path = Some(dev_path.into());
        self
    }

    pub fn with_vectors(mut self, vectors_path: impl Into<PathBuf>) -> Self {
        self.vectors_path = Some(vectors_path.into());
        self
    }

    pub fn with_config(mut self, config: TrainConfig) -> Self {
        self.config = config;
        self
    }
}

struct LoadedModel {
    model: BiLstmCrf,
    word_vocab: Vocab,
    tag_vocab: Vocab,
}

/// Named entity recognizer backed by a BiLSTM-CRF.
pub struct Ner {
    device: Device,
    tokenizer: Tokenizer,
    state: Option<LoadedModel>,
}

impl Default for Ner {
    fn default() -> Self {
        Self::new(Device::Cpu)
    }
}

impl Ner {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            tokenizer: Tokenizer::new().with_punctuation_split(true),
            state: None,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    /// Train a new model, discarding any loaded one.
    pub fn train(&mut self, options: TrainOptions) -> Result<TrainingSummary> {
        self.train_with_observer(options, NoopObserver)
    }

    /// Train a new model, reporting scalars to `observer`.
    ///
    /// Checkpoints land in `config.save_path`. The in-memory model afterwards
    /// holds the final epoch's weights; [`Ner::load`] restores the best one.
    pub fn train_with_observer<O: MetricsObserver>(
        &mut self,
        options: TrainOptions,
        observer: O,
    ) -> Result<TrainingSummary> {
        let TrainOptions {
            train_path,
            dev_path,
            vectors_path,
            config,
        } = options;
        config.validate()?;

        let train = load_conll(&train_path)?;
        let dev = dev_path.as_ref().map(load_conll).transpose()?;
        if let (Some(path), Some(dev)) = (&dev_path, &dev) {
            if dev.is_empty() {
                return Err(NerveError::EmptyDataset(format!(
                    "dev set {} has no sentences",
                    path.display()
                )));
            }
        }
        info!(
            train = train.len(),
            dev = dev.as_ref().map_or(0, Vec::len),
            "datasets loaded"
        );

        let (word_vocab, tag_vocab) = match &dev {
            Some(dev) => (
                Vocab::words(&[train.as_slice(), dev.as_slice()], config.min_freq),
                Vocab::tags(&[train.as_slice(), dev.as_slice()]),
            ),
            None => (
                Vocab::words(&[train.as_slice()], config.min_freq),
                Vocab::tags(&[train.as_slice()]),
            ),
        };
        info!(words = word_vocab.len(), tags = tag_vocab.len(), "vocabularies built");

        let model_config = ModelConfig {
            vocabulary_size: word_vocab.len(),
            tag_num: tag_vocab.len(),
            pad_index: word_vocab.index(PAD_TOKEN).unwrap_or(config.model.pad_index),
            ..config.model.clone()
        };
        let mut model = BiLstmCrf::new(model_config.clone(), &tag_vocab, &self.device)?;
        model.reseed(config.seed)?;
        if let Some(path) = &vectors_path {
            let rows = vectors::load_vectors(path, &word_vocab, model_config.embedding_dim)?;
            model.load_pretrained(&rows)?;
        }

        let batches = BatchIterator::new(&train, &word_vocab, &tag_vocab, config.batch_size, config.seed)?;
        let mut checkpoint = DirCheckpoint::new(
            &config.save_path,
            SavedConfig {
                model: model_config,
                word_vocab: word_vocab.clone(),
                tag_vocab: tag_vocab.clone(),
            },
        );
        let scorer = TagScorer::new(&word_vocab, &tag_vocab, config.metric);
        let validation = dev.as_deref().map(|examples| Validation {
            examples,
            scorer: &scorer,
        });

        let mut trainer = Trainer::new(&config).with_observer(observer);
        let summary = trainer.fit(&mut model, &batches, validation, &mut checkpoint)?;

        self.state = Some(LoadedModel {
            model,
            word_vocab,
            tag_vocab,
        });
        Ok(summary)
    }

    /// Load a model saved under `save_path`.
    pub fn load<P: AsRef<Path>>(&mut self, save_path: P) -> Result<()> {
        let dir = save_path.as_ref();
        let SavedConfig {
            model: model_config,
            word_vocab,
            tag_vocab,
        } = read_config(dir)?;

        let mut model = BiLstmCrf::new(model_config, &tag_vocab, &self.device)?;
        model.load_weights(dir.join(WEIGHTS_FILE))?;
        model.set_training(false);
        info!(path = %dir.display(), "model loaded");

        self.state = Some(LoadedModel {
            model,
            word_vocab,
            tag_vocab,
        });
        Ok(())
    }

    fn loaded(&self) -> Result<&LoadedModel> {
        self.state.as_ref().ok_or(NerveError::ModelNotLoaded)
    }

    /// Entity spans over pre-split tokens.
    pub fn predict<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<Span>> {
        let loaded = self.loaded()?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = vec![loaded.word_vocab.encode(tokens)];
        let path = loaded.model.decode(&inputs)?.pop().unwrap_or_default();
        let tags = loaded.tag_vocab.decode(&path);
        Ok(decode_spans(&tags))
    }

    /// Tokenize `text` and return entities with their surface strings.
    pub fn predict_text(&self, text: &str) -> Result<Vec<Entity>> {
        let tokens = self.tokenizer.tokenize(text);
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        let spans = self.predict(&words)?;

        Ok(spans
            .into_iter()
            .filter_map(|span| {
                let (start, end) = Tokenizer::get_span(&tokens, span.start, span.end)?;
                Some(Entity {
                    text: text[start..end].to_string(),
                    span,
                })
            })
            .collect())
    }

    /// Mean score of the loaded model over a CoNLL file.
    pub fn test<P: AsRef<Path>>(&self, path: P, metric: ScoreMetric) -> Result<f64> {
        let loaded = self.loaded()?;
        let examples = load_conll(path.as_ref())?;
        let scorer = TagScorer::new(&loaded.word_vocab, &loaded.tag_vocab, metric);
        let score = evaluate(&loaded.model, &examples, &scorer)?;
        info!(path = %path.as_ref().display(), examples = examples.len(), score, "test score");
        Ok(score)
    }
}
