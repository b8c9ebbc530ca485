//! Linear-chain CRF layer on top of per-token emission scores.

use candle_core::{IndexOp, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::error::{NerveError, Result};
use crate::viterbi::ViterbiDecoder;

/// CRF transition parameters and the decoder used for best-path inference.
pub struct Crf {
    num_tags: usize,
    /// Score of opening a sequence with each tag, `[K]`.
    pub start_transitions: Tensor,
    /// Score of closing a sequence with each tag, `[K]`.
    pub end_transitions: Tensor,
    /// Score of moving from tag `i` to tag `j`, `[K, K]` indexed `[i, j]`.
    pub transitions: Tensor,
    decoder: ViterbiDecoder,
}

impl Crf {
    pub fn new(num_tags: usize, vb: VarBuilder) -> Result<Self> {
        let init = Init::Uniform { lo: -0.1, up: 0.1 };
        let start_transitions = vb.get_with_hints(num_tags, "start_transitions", init)?;
        let end_transitions = vb.get_with_hints(num_tags, "end_transitions", init)?;
        let transitions = vb.get_with_hints((num_tags, num_tags), "transitions", init)?;

        Ok(Self {
            num_tags,
            start_transitions,
            end_transitions,
            transitions,
            decoder: ViterbiDecoder::new(num_tags),
        })
    }

    /// Replace the unconstrained decoder, e.g. with [`ViterbiDecoder::constrained`].
    pub fn with_decoder(mut self, decoder: ViterbiDecoder) -> Result<Self> {
        if decoder.num_tags() != self.num_tags {
            return Err(NerveError::InvalidConfig(format!(
                "decoder has {} tags, CRF has {}",
                decoder.num_tags(),
                self.num_tags
            )));
        }
        self.decoder = decoder;
        Ok(self)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Log-likelihood of `tags` under `emissions` (`[seq_len, K]`), as a scalar.
    ///
    /// Gold path score minus the log partition function (forward algorithm).
    pub fn log_likelihood(&self, emissions: &Tensor, tags: &[u32]) -> Result<Tensor> {
        let (seq_len, num_tags) = emissions.dims2()?;
        if seq_len != tags.len() {
            return Err(NerveError::LengthMismatch {
                tokens: seq_len,
                tags: tags.len(),
            });
        }
        if num_tags != self.num_tags || seq_len == 0 {
            return Err(NerveError::InvalidConfig(format!(
                "expected non-empty emissions with {} tags, got shape ({seq_len}, {num_tags})",
                self.num_tags
            )));
        }

        let gold = self.path_score(emissions, tags)?;
        let log_z = self.log_partition(emissions)?;
        Ok(gold.sub(&log_z)?)
    }

    fn path_score(&self, emissions: &Tensor, tags: &[u32]) -> Result<Tensor> {
        let device = emissions.device();
        let tag_ids = Tensor::new(tags, device)?.unsqueeze(1)?;
        let mut score = emissions.gather(&tag_ids, 1)?.sum_all()?;

        score = score.add(&self.start_transitions.i(tags[0] as usize)?)?;
        score = score.add(&self.end_transitions.i(tags[tags.len() - 1] as usize)?)?;

        if tags.len() > 1 {
            let k = self.num_tags as u32;
            let pairs: Vec<u32> = tags.windows(2).map(|w| w[0] * k + w[1]).collect();
            let pairs = Tensor::new(pairs.as_slice(), device)?;
            let moves = self.transitions.flatten_all()?.index_select(&pairs, 0)?;
            score = score.add(&moves.sum_all()?)?;
        }

        Ok(score)
    }

    fn log_partition(&self, emissions: &Tensor) -> Result<Tensor> {
        let seq_len = emissions.dim(0)?;
        let mut alpha = self.start_transitions.add(&emissions.i(0)?)?;
        for t in 1..seq_len {
            // alpha[j] = logsumexp_i(alpha[i] + transitions[i, j]) + emissions[t, j]
            let scores = alpha.unsqueeze(1)?.broadcast_add(&self.transitions)?;
            alpha = log_sum_exp(&scores, 0)?.add(&emissions.i(t)?)?;
        }
        log_sum_exp(&alpha.add(&self.end_transitions)?, 0)
    }

    /// Best tag path for `emissions` (`[seq_len, K]`).
    pub fn decode(&self, emissions: &Tensor) -> Result<Vec<u32>> {
        let scores = emissions.to_vec2::<f32>()?;
        let transitions = self.transitions.to_vec2::<f32>()?;
        let start = self.start_transitions.to_vec1::<f32>()?;
        let end = self.end_transitions.to_vec1::<f32>()?;
        self.decoder.decode(&scores, &transitions, &start, &end)
    }
}

/// Numerically stable log-sum-exp over `dim`, removing that dimension.
fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let sum = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    Ok(sum.add(&max)?.squeeze(dim)?)
}
