//! # Viterbi Decoding for CRF
//!
//! Implements the Viterbi algorithm for finding the most likely tag sequence
//! given emission scores, transition scores and optional transition constraints.

use crate::error::{NerveError, Result};
use crate::tags::IobTag;
use crate::vocab::Vocab;

/// Score given to forbidden transitions.
const FORBIDDEN: f32 = -10_000.0;

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
    /// `allowed[from][to]`; `None` means every transition is allowed.
    allowed: Option<Vec<Vec<bool>>>,
    /// Tags allowed at position 0.
    allowed_start: Option<Vec<bool>>,
}

impl ViterbiDecoder {
    /// Create an unconstrained decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Number of distinct tags
    pub fn new(num_tags: usize) -> Self {
        Self {
            num_tags,
            allowed: None,
            allowed_start: None,
        }
    }

    /// Create a decoder that forbids invalid IOB transitions (`O -> I-X`,
    /// `B-X -> I-Y`, ...) between the tags of `tag_vocab`.
    pub fn constrained(tag_vocab: &Vocab) -> Self {
        let tags: Vec<IobTag> = tag_vocab.itos().iter().map(|t| IobTag::parse(t)).collect();
        let allowed = tags
            .iter()
            .map(|from| {
                tags.iter()
                    .map(|to| IobTag::is_valid_transition(from, to))
                    .collect()
            })
            .collect();
        let allowed_start = tags.iter().map(IobTag::is_valid_start).collect();

        Self {
            num_tags: tags.len(),
            allowed: Some(allowed),
            allowed_start: Some(allowed_start),
        }
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    fn transition_allowed(&self, from: usize, to: usize) -> bool {
        self.allowed.as_ref().is_none_or(|a| a[from][to])
    }

    fn start_allowed(&self, tag: usize) -> bool {
        self.allowed_start.as_ref().is_none_or(|a| a[tag])
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emission_scores` - Matrix of shape [seq_len, num_tags]
    /// * `transition_matrix` - Matrix of shape [num_tags, num_tags], indexed `[from][to]`
    /// * `start_scores` / `end_scores` - Scores for opening and closing the sequence with each tag
    ///
    /// # Returns
    /// The optimal tag sequence as indices.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_scores: &[f32],
        end_scores: &[f32],
    ) -> Result<Vec<u32>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }

        // Validate dimensions
        if let Some(row) = emission_scores.iter().find(|row| row.len() != self.num_tags) {
            return Err(NerveError::InvalidConfig(format!(
                "emission score dimension mismatch: expected {}, got {}",
                self.num_tags,
                row.len()
            )));
        }
        if transition_matrix.len() != self.num_tags
            || transition_matrix.iter().any(|row| row.len() != self.num_tags)
            || start_scores.len() != self.num_tags
            || end_scores.len() != self.num_tags
        {
            return Err(NerveError::InvalidConfig(format!(
                "transition scores must be {n}x{n} with {n} start/end scores",
                n = self.num_tags
            )));
        }

        // DP table
        let mut dp: Vec<Vec<f32>> = vec![vec![f32::NEG_INFINITY; self.num_tags]; seq_len];
        let mut backptr: Vec<Vec<usize>> = vec![vec![0; self.num_tags]; seq_len];

        // Initialize
        for tag in 0..self.num_tags {
            let penalty = if self.start_allowed(tag) { 0.0 } else { FORBIDDEN };
            dp[0][tag] = start_scores[tag] + emission_scores[0][tag] + penalty;
        }

        // Forward pass
        for pos in 1..seq_len {
            for curr_tag in 0..self.num_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;

                for prev_tag in 0..self.num_tags {
                    let penalty = if self.transition_allowed(prev_tag, curr_tag) {
                        0.0
                    } else {
                        FORBIDDEN
                    };
                    let score = dp[pos - 1][prev_tag] + transition_matrix[prev_tag][curr_tag] + penalty;

                    if score > best_score {
                        best_score = score;
                        best_prev = prev_tag;
                    }
                }

                dp[pos][curr_tag] = best_score + emission_scores[pos][curr_tag];
                backptr[pos][curr_tag] = best_prev;
            }
        }

        // Find best final tag
        let mut best_final_tag = 0;
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..self.num_tags {
            let score = dp[seq_len - 1][tag] + end_scores[tag];
            if score > best_final_score {
                best_final_score = score;
                best_final_tag = tag;
            }
        }

        // Backtrack
        let mut path = Vec::with_capacity(seq_len);
        let mut curr_tag = best_final_tag;
        path.push(curr_tag as u32);
        for pos in (1..seq_len).rev() {
            curr_tag = backptr[pos][curr_tag];
            path.push(curr_tag as u32);
        }

        path.reverse();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeros(n: usize) -> (Vec<Vec<f32>>, Vec<f32>, Vec<f32>) {
        (vec![vec![0.0; n]; n], vec![0.0; n], vec![0.0; n])
    }

    /// Exhaustive search over all tag paths, for small inputs.
    fn brute_force(
        emissions: &[Vec<f32>],
        transitions: &[Vec<f32>],
        start: &[f32],
        end: &[f32],
    ) -> Vec<u32> {
        let n = start.len();
        let len = emissions.len();
        let mut best = (f32::NEG_INFINITY, Vec::new());
        for code in 0..n.pow(len as u32) {
            let path: Vec<usize> = (0..len).map(|i| (code / n.pow(i as u32)) % n).collect();
            let mut score = start[path[0]] + end[path[len - 1]];
            for (i, &tag) in path.iter().enumerate() {
                score += emissions[i][tag];
                if i > 0 {
                    score += transitions[path[i - 1]][tag];
                }
            }
            if score > best.0 {
                best = (score, path.iter().map(|&t| t as u32).collect());
            }
        }
        best.1
    }

    #[test]
    fn test_viterbi_follows_emissions() {
        let decoder = ViterbiDecoder::new(3);
        let (transitions, start, end) = zeros(3);
        let emissions = vec![vec![0.1, 0.8, 0.1], vec![0.8, 0.1, 0.1], vec![0.0, 0.0, 2.0]];

        let path = decoder.decode(&emissions, &transitions, &start, &end).unwrap();
        assert_eq!(path, vec![1, 0, 2]);
    }

    #[test]
    fn test_viterbi_matches_brute_force() {
        let decoder = ViterbiDecoder::new(3);
        let emissions = vec![
            vec![0.5, 0.2, 0.1],
            vec![0.1, 0.4, 0.3],
            vec![0.3, 0.3, 0.9],
            vec![0.2, 0.6, 0.1],
        ];
        let transitions = vec![
            vec![0.1, -0.5, 0.3],
            vec![0.7, 0.0, -0.2],
            vec![-0.4, 0.9, 0.1],
        ];
        let start = vec![0.0, 0.3, -0.1];
        let end = vec![0.2, -0.3, 0.0];

        let path = decoder.decode(&emissions, &transitions, &start, &end).unwrap();
        assert_eq!(path, brute_force(&emissions, &transitions, &start, &end));
    }

    #[test]
    fn test_viterbi_empty() {
        let decoder = ViterbiDecoder::new(3);
        let (transitions, start, end) = zeros(3);
        let path = decoder.decode(&[], &transitions, &start, &end).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let decoder = ViterbiDecoder::new(3);
        let (transitions, start, end) = zeros(3);
        let emissions = vec![vec![0.0, 1.0]];
        assert!(decoder.decode(&emissions, &transitions, &start, &end).is_err());
    }

    #[test]
    fn test_decode_constrained() {
        let vocab = Vocab::from_itos(vec!["O".into(), "B-PER".into(), "I-PER".into()]);
        let decoder = ViterbiDecoder::constrained(&vocab);
        let (transitions, start, end) = zeros(3);

        // Emissions favour O then I-PER, which is not a valid sequence.
        let emissions = vec![vec![1.0, 0.0, 0.0], vec![0.0, 0.5, 1.0]];
        let path = decoder.decode(&emissions, &transitions, &start, &end).unwrap();
        assert_eq!(path, vec![0, 1]);

        // I-PER cannot open a sequence either.
        let emissions = vec![vec![0.0, 0.5, 1.0]];
        let path = decoder.decode(&emissions, &transitions, &start, &end).unwrap();
        assert_eq!(path, vec![1]);
    }
}
