//! # BiLSTM-CRF Sequence Tagger
//!
//! Word embeddings feed a stack of bidirectional LSTM layers whose outputs
//! are projected to per-tag emission scores and scored by a linear-chain CRF.

use std::cell::RefCell;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Embedding, LSTM, LSTMConfig, Linear, Module, RNN, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crf::Crf;
use crate::dataset::Batch;
use crate::error::{NerveError, Result};
use crate::viterbi::ViterbiDecoder;
use crate::vocab::Vocab;

const EMBEDDING_WEIGHT: &str = "embedding.weight";
/// Stream selector keeping dropout draws apart from weight initialization.
const DROPOUT_STREAM: u64 = 0x9e37_79b9_7f4a_7c15;

/// Network hyperparameters, persisted next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of word vocabulary entries.
    pub vocabulary_size: usize,
    /// Number of tags.
    pub tag_num: usize,
    pub embedding_dim: usize,
    /// Total LSTM output width; each direction gets half.
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub dropout: f32,
    /// Word index used for padding; its embedding row starts at zero.
    pub pad_index: u32,
    /// Forbid invalid IOB transitions during decoding.
    pub constrained_decoding: bool,
    /// Keep the embedding matrix fixed during training.
    pub static_embeddings: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocabulary_size: 0,
            tag_num: 0,
            embedding_dim: 300,
            hidden_dim: 300,
            num_layers: 2,
            dropout: 0.5,
            pad_index: 1,
            constrained_decoding: false,
            static_embeddings: false,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        let problem = if self.vocabulary_size == 0 {
            Some("vocabulary_size must be > 0".to_string())
        } else if self.tag_num == 0 {
            Some("tag_num must be > 0".to_string())
        } else if self.embedding_dim == 0 {
            Some("embedding_dim must be > 0".to_string())
        } else if self.hidden_dim < 2 || self.hidden_dim % 2 != 0 {
            Some(format!("hidden_dim must be even and >= 2, got {}", self.hidden_dim))
        } else if self.num_layers == 0 {
            Some("num_layers must be > 0".to_string())
        } else if !(0.0..1.0).contains(&self.dropout) {
            Some(format!("dropout must be in [0, 1), got {}", self.dropout))
        } else if self.pad_index as usize >= self.vocabulary_size {
            Some(format!(
                "pad_index {} outside vocabulary of {}",
                self.pad_index, self.vocabulary_size
            ))
        } else {
            None
        };
        match problem {
            Some(msg) => Err(NerveError::InvalidConfig(msg)),
            None => Ok(()),
        }
    }
}

/// A model that scores tag sequences and decodes the best one.
pub trait SequenceTagger {
    /// Log-likelihood of the gold tags, summed over the batch (scalar).
    fn log_likelihood(&self, batch: &Batch) -> Result<Tensor>;

    /// Loss to minimize: negative log-likelihood normalized by batch width.
    fn compute_loss(&self, batch: &Batch) -> Result<Tensor> {
        let width = batch.len().max(1) as f64;
        Ok(self.log_likelihood(batch)?.affine(-1.0 / width, 0.0)?)
    }

    /// Best tag indices for each input sequence.
    fn decode(&self, inputs: &[Vec<u32>]) -> Result<Vec<Vec<u32>>>;

    /// Switch between training (dropout on) and evaluation mode.
    fn set_training(&mut self, training: bool);
}

/// A tagger whose parameters can be optimized.
pub trait TrainableTagger: SequenceTagger {
    /// Variables the optimizer should update.
    fn trainable_vars(&self) -> Result<Vec<Var>>;
}

/// One bidirectional LSTM layer.
struct BiLstmLayer {
    forward: LSTM,
    backward: LSTM,
}

impl BiLstmLayer {
    fn new(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let forward = candle_nn::lstm(in_dim, hidden_dim, LSTMConfig::default(), vb.pp("fwd"))?;
        let backward = candle_nn::lstm(in_dim, hidden_dim, LSTMConfig::default(), vb.pp("bwd"))?;
        Ok(Self { forward, backward })
    }

    /// `xs`: `[1, seq_len, in_dim]` -> `[1, seq_len, 2 * hidden_dim]`
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let seq_len = xs.dim(1)?;
        let fwd = self.forward.states_to_tensor(&self.forward.seq(xs)?)?;

        let reverse: Vec<u32> = (0..seq_len as u32).rev().collect();
        let reverse = Tensor::new(reverse.as_slice(), xs.device())?;
        let reversed = xs.index_select(&reverse, 1)?;
        let bwd = self
            .backward
            .states_to_tensor(&self.backward.seq(&reversed)?)?
            .index_select(&reverse, 1)?;

        Ok(Tensor::cat(&[&fwd, &bwd], 2)?)
    }
}

/// BiLSTM-CRF network owning its variables.
pub struct BiLstmCrf {
    config: ModelConfig,
    varmap: VarMap,
    device: Device,
    embedding: Embedding,
    layers: Vec<BiLstmLayer>,
    /// Draws dropout masks; re-seeded by [`BiLstmCrf::reseed`].
    dropout_rng: RefCell<oorandom::Rand32>,
    hidden2tag: Linear,
    crf: Crf,
    training: bool,
}

impl BiLstmCrf {
    /// Build a freshly initialized model for `tag_vocab` on `device`.
    pub fn new(config: ModelConfig, tag_vocab: &Vocab, device: &Device) -> Result<Self> {
        config.validate()?;
        if tag_vocab.len() != config.tag_num {
            return Err(NerveError::InvalidConfig(format!(
                "tag vocabulary has {} entries, config expects {}",
                tag_vocab.len(),
                config.tag_num
            )));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let embedding = candle_nn::embedding(
            config.vocabulary_size,
            config.embedding_dim,
            vb.pp("embedding"),
        )?;

        let direction_dim = config.hidden_dim / 2;
        let mut layers = Vec::with_capacity(config.num_layers);
        for layer in 0..config.num_layers {
            let in_dim = if layer == 0 {
                config.embedding_dim
            } else {
                config.hidden_dim
            };
            layers.push(BiLstmLayer::new(
                in_dim,
                direction_dim,
                vb.pp(format!("lstm.l{layer}")),
            )?);
        }

        let hidden2tag = candle_nn::linear(config.hidden_dim, config.tag_num, vb.pp("hidden2tag"))?;

        let mut crf = Crf::new(config.tag_num, vb.pp("crf"))?;
        if config.constrained_decoding {
            crf = crf.with_decoder(ViterbiDecoder::constrained(tag_vocab))?;
        }


        Ok(Self {
            config,
            varmap,
            device: device.clone(),
            embedding,
            layers,
            dropout_rng: RefCell::new(oorandom::Rand32::new_inc(0, DROPOUT_STREAM)),
            hidden2tag,
            crf,
            training: false,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Re-draw every variable from a generator seeded with `seed`.
    ///
    /// Embeddings are N(0, 1) with a zero padding row, CRF scores U(-0.1, 0.1),
    /// LSTM weights U(-1/sqrt(h), 1/sqrt(h)) for per-direction width `h`, and
    /// the output projection U(-1/sqrt(fan_in), 1/sqrt(fan_in)). The dropout
    /// mask generator restarts from the same seed.
    pub fn reseed(&self, seed: u64) -> Result<()> {
        let mut rng = oorandom::Rand32::new(seed);
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?;

        let mut names: Vec<&String> = data.keys().collect();
        names.sort();

        let lstm_bound = 1.0 / ((self.config.hidden_dim / 2) as f32).sqrt();
        let linear_bound = 1.0 / (self.config.hidden_dim as f32).sqrt();

        for name in names {
            let var = &data[name];
            let dims = var.dims().to_vec();
            let count = var.elem_count();

            let values: Vec<f32> = if name == EMBEDDING_WEIGHT {
                let mut values: Vec<f32> = (0..count).map(|_| normal(&mut rng)).collect();
                let dim = self.config.embedding_dim;
                let pad = self.config.pad_index as usize * dim;
                values[pad..pad + dim].fill(0.0);
                values
            } else {
                let bound = if name.starts_with("crf.") {
                    0.1
                } else if name.starts_with("lstm.") {
                    lstm_bound
                } else {
                    linear_bound
                };
                (0..count).map(|_| uniform(&mut rng, bound)).collect()
            };

            var.set(&Tensor::from_vec(values, dims.as_slice(), &self.device)?)?;
        }

        *self.dropout_rng.borrow_mut() = oorandom::Rand32::new_inc(seed, DROPOUT_STREAM);
        debug!(seed, "initialized model parameters");
        Ok(())
    }

    /// Copy pretrained rows into the embedding matrix.
    ///
    /// Each entry is `(word index, vector)`; vectors must have `embedding_dim`
    /// components.
    pub fn load_pretrained(&self, rows: &[(u32, Vec<f32>)]) -> Result<()> {
        let var = self.embedding_var()?;
        let mut matrix = var.as_tensor().to_vec2::<f32>()?;
        for (index, vector) in rows {
            let Some(row) = matrix.get_mut(*index as usize) else {
                return Err(NerveError::InvalidConfig(format!(
                    "pretrained row {index} outside vocabulary of {}",
                    self.config.vocabulary_size
                )));
            };
            if vector.len() != self.config.embedding_dim {
                return Err(NerveError::VectorDimension {
                    word: index.to_string(),
                    expected: self.config.embedding_dim,
                    found: vector.len(),
                });
            }
            row.copy_from_slice(vector);
        }

        let flat: Vec<f32> = matrix.into_iter().flatten().collect();
        var.set(&Tensor::from_vec(
            flat,
            (self.config.vocabulary_size, self.config.embedding_dim),
            &self.device,
        )?)?;
        Ok(())
    }

    fn embedding_var(&self) -> Result<Var> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
        data.get(EMBEDDING_WEIGHT)
            .cloned()
            .ok_or_else(|| NerveError::InvalidConfig("model has no embedding matrix".into()))
    }

    /// Write all variables as safetensors.
    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    /// Load variables written by [`BiLstmCrf::save_weights`].
    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }

    /// Inverted dropout with masks from the seeded generator; identity in eval mode.
    fn dropout(&self, xs: &Tensor) -> Result<Tensor> {
        let p = self.config.dropout;
        if !self.training || p == 0.0 {
            return Ok(xs.clone());
        }

        let keep = 1.0 / (1.0 - p);
        let mut rng = self.dropout_rng.borrow_mut();
        let mask: Vec<f32> = (0..xs.elem_count())
            .map(|_| if rng.rand_float() < p { 0.0 } else { keep })
            .collect();
        let mask = Tensor::from_vec(mask, xs.shape(), xs.device())?.to_dtype(xs.dtype())?;
        Ok(xs.mul(&mask)?)
    }

    /// Emission scores `[len, tag_num]` for each sequence; `None` for empty ones.
    fn emissions(&self, inputs: &[Vec<u32>]) -> Result<Vec<Option<Tensor>>> {
        let batch = Batch {
            inputs: inputs.to_vec(),
            lengths: inputs.iter().map(Vec::len).collect(),
            tags: Vec::new(),
        };
        let width = batch.max_len();
        if width == 0 {
            return Ok(vec![None; inputs.len()]);
        }

        let flat: Vec<u32> = batch
            .padded_inputs(self.config.pad_index)
            .into_iter()
            .flatten()
            .collect();
        let ids = Tensor::from_vec(flat, (batch.len(), width), &self.device)?;
        let embedded = self.embedding.forward(&ids)?;
        let embedded = self.dropout(&embedded)?;

        let mut out = Vec::with_capacity(inputs.len());
        for (row, &len) in batch.lengths.iter().enumerate() {
            if len == 0 {
                out.push(None);
                continue;
            }

            // Padding never enters the recurrence.
            let mut xs = embedded.narrow(0, row, 1)?.narrow(1, 0, len)?;
            for (idx, layer) in self.layers.iter().enumerate() {
                if idx > 0 {
                    xs = self.dropout(&xs)?;
                }
                xs = layer.forward(&xs)?;
            }
            let xs = self.dropout(&xs)?;
            out.push(Some(self.hidden2tag.forward(&xs.squeeze(0)?)?));
        }
        Ok(out)
    }
}

impl SequenceTagger for BiLstmCrf {
    fn log_likelihood(&self, batch: &Batch) -> Result<Tensor> {
        if batch.tags.len() != batch.inputs.len() {
            return Err(NerveError::LengthMismatch {
                tokens: batch.inputs.len(),
                tags: batch.tags.len(),
            });
        }

        let emissions = self.emissions(&batch.inputs)?;
        let mut scores = Vec::with_capacity(batch.len());
        for (emission, tags) in emissions.iter().zip(&batch.tags) {
            if let Some(emission) = emission {
                scores.push(self.crf.log_likelihood(emission, tags)?);
            }
        }

        if scores.is_empty() {
            return Ok(Tensor::zeros((), DType::F32, &self.device)?);
        }
        Ok(Tensor::stack(&scores, 0)?.sum_all()?)
    }

    fn decode(&self, inputs: &[Vec<u32>]) -> Result<Vec<Vec<u32>>> {
        self.emissions(inputs)?
            .iter()
            .map(|emission| match emission {
                Some(emission) => self.crf.decode(emission),
                None => Ok(Vec::new()),
            })
            .collect()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl TrainableTagger for BiLstmCrf {
    fn trainable_vars(&self) -> Result<Vec<Var>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
        let mut named: Vec<(&String, &Var)> = data
            .iter()
            .filter(|(name, _)| !(self.config.static_embeddings && name.as_str() == EMBEDDING_WEIGHT))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Ok(named.into_iter().map(|(_, var)| var.clone()).collect())
    }
}

fn uniform(rng: &mut oorandom::Rand32, bound: f32) -> f32 {
    (rng.rand_float() * 2.0 - 1.0) * bound
}

/// Standard normal sample (Box-Muller).
fn normal(rng: &mut oorandom::Rand32) -> f32 {
    let u1 = rng.rand_float().max(f32::MIN_POSITIVE);
    let u2 = rng.rand_float();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_vocab() -> Vocab {
        Vocab::from_itos(vec!["O".into(), "B-PER".into(), "I-PER".into()])
    }

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            vocabulary_size: 6,
            tag_num: 3,
            embedding_dim: 4,
            hidden_dim: 6,
            num_layers: 2,
            dropout: 0.0,
            ..ModelConfig::default()
        }
    }

    fn batch() -> Batch {
        Batch {
            inputs: vec![vec![2, 3, 4], vec![5]],
            lengths: vec![3, 1],
            tags: vec![vec![1, 2, 0], vec![0]],
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(tiny_config().validate().is_ok());

        let odd = ModelConfig {
            hidden_dim: 5,
            ..tiny_config()
        };
        assert!(odd.validate().is_err());

        let empty = ModelConfig::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_tag_count_must_match_vocab() {
        let config = ModelConfig {
            tag_num: 4,
            ..tiny_config()
        };
        assert!(BiLstmCrf::new(config, &tag_vocab(), &Device::Cpu).is_err());
    }

    #[test]
    fn test_loss_is_finite_and_positive() {
        let model = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        model.reseed(2019).unwrap();

        let loss = model.compute_loss(&batch()).unwrap().to_scalar::<f32>().unwrap();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn test_decode_shapes() {
        let model = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        let paths = model.decode(&[vec![2, 3, 4], vec![], vec![5]]).unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0].len(), 3);
        assert!(paths[1].is_empty());
        assert_eq!(paths[2].len(), 1);
        assert!(paths.iter().flatten().all(|&t| t < 3));
    }

    #[test]
    fn test_reseed_is_deterministic() {
        let a = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        let b = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        a.reseed(7).unwrap();
        b.reseed(7).unwrap();

        let la = a.log_likelihood(&batch()).unwrap().to_scalar::<f32>().unwrap();
        let lb = b.log_likelihood(&batch()).unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_dropout_masks_follow_seed() {
        let config = ModelConfig {
            dropout: 0.5,
            ..tiny_config()
        };
        let losses = |seed: u64| -> Vec<f32> {
            let mut model = BiLstmCrf::new(config.clone(), &tag_vocab(), &Device::Cpu).unwrap();
            model.reseed(seed).unwrap();
            model.set_training(true);
            (0..3)
                .map(|_| model.compute_loss(&batch()).unwrap().to_scalar::<f32>().unwrap())
                .collect()
        };
        assert_eq!(losses(7), losses(7));
    }

    #[test]
    fn test_eval_mode_skips_dropout() {
        let dropped = BiLstmCrf::new(
            ModelConfig {
                dropout: 0.5,
                ..tiny_config()
            },
            &tag_vocab(),
            &Device::Cpu,
        )
        .unwrap();
        let plain = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        dropped.reseed(5).unwrap();
        plain.reseed(5).unwrap();

        let a = dropped.log_likelihood(&batch()).unwrap().to_scalar::<f32>().unwrap();
        let b = plain.log_likelihood(&batch()).unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_poisoned_varmap_is_an_error() {
        let model = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        let varmap = model.varmap.clone();
        let crashed = std::thread::spawn(move || {
            let _guard = varmap.data().lock().unwrap();
            panic!("worker died holding the variable lock");
        })
        .join();
        assert!(crashed.is_err());

        assert!(matches!(model.trainable_vars(), Err(NerveError::Candle(_))));
    }

    #[test]
    fn test_padding_row_is_zero() {
        let model = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        model.reseed(1).unwrap();
        let matrix = model
            .embedding_var()
            .unwrap()
            .as_tensor()
            .to_vec2::<f32>()
            .unwrap();
        assert!(matrix[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_static_embeddings_are_not_trained() {
        let trainable = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        let frozen = BiLstmCrf::new(
            ModelConfig {
                static_embeddings: true,
                ..tiny_config()
            },
            &tag_vocab(),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(
            trainable.trainable_vars().unwrap().len(),
            frozen.trainable_vars().unwrap().len() + 1
        );
    }

    #[test]
    fn test_load_pretrained_rows() {
        let model = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        model.load_pretrained(&[(3, vec![1.0, 2.0, 3.0, 4.0])]).unwrap();
        let matrix = model
            .embedding_var()
            .unwrap()
            .as_tensor()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(matrix[3], vec![1.0, 2.0, 3.0, 4.0]);

        let err = model.load_pretrained(&[(3, vec![1.0])]).unwrap_err();
        assert!(matches!(err, NerveError::VectorDimension { .. }));
    }

    #[test]
    fn test_gradient_step_lowers_loss() {
        use candle_nn::{AdamW, Optimizer, ParamsAdamW};

        let mut model = BiLstmCrf::new(tiny_config(), &tag_vocab(), &Device::Cpu).unwrap();
        model.reseed(3).unwrap();
        model.set_training(true);
        let mut opt = AdamW::new(
            model.trainable_vars().unwrap(),
            ParamsAdamW {
                lr: 0.05,
                weight_decay: 0.0,
                ..Default::default()
            },
        )
        .unwrap();

        let batch = batch();
        let first = model.compute_loss(&batch).unwrap();
        let first_value = first.to_scalar::<f32>().unwrap();
        opt.backward_step(&first).unwrap();
        for _ in 0..20 {
            let loss = model.compute_loss(&batch).unwrap();
            opt.backward_step(&loss).unwrap();
        }
        let last = model.compute_loss(&batch).unwrap().to_scalar::<f32>().unwrap();
        assert!(last < first_value, "loss went from {first_value} to {last}");
    }
}
