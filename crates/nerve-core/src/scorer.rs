//! Per-example quality metrics for validation and testing.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dataset::TaggedExample;
use crate::error::{NerveError, Result};
use crate::model::SequenceTagger;
use crate::spans::{decode_spans, Span};
use crate::vocab::Vocab;

/// Metric reported by [`TagScorer`]. Higher is better for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMetric {
    /// Harmonic mean of span precision and recall.
    #[default]
    F1,
    Precision,
    Recall,
    /// Fraction of tokens whose tag is correct.
    Accuracy,
}

impl FromStr for ScoreMetric {
    type Err = NerveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f1" => Ok(ScoreMetric::F1),
            "p" | "precision" => Ok(ScoreMetric::Precision),
            "r" | "recall" => Ok(ScoreMetric::Recall),
            "acc" | "accuracy" => Ok(ScoreMetric::Accuracy),
            other => Err(NerveError::InvalidConfig(format!("unknown metric {other:?}"))),
        }
    }
}

/// Scores a model on a single example.
pub trait Scorer {
    fn score(&self, model: &dyn SequenceTagger, example: &TaggedExample) -> Result<f64>;
}

/// Exact-match span precision, recall and F1.
///
/// When neither side contains entities all three are 1.0.
pub fn span_prf(gold: &[Span], predicted: &[Span]) -> (f64, f64, f64) {
    if gold.is_empty() && predicted.is_empty() {
        return (1.0, 1.0, 1.0);
    }

    let gold: HashSet<&Span> = gold.iter().collect();
    let predicted: HashSet<&Span> = predicted.iter().collect();
    let correct = gold.intersection(&predicted).count() as f64;

    let precision = if predicted.is_empty() {
        0.0
    } else {
        correct / predicted.len() as f64
    };
    let recall = if gold.is_empty() {
        0.0
    } else {
        correct / gold.len() as f64
    };
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    (precision, recall, f1)
}

/// Score predicted tag strings against gold tag strings.
pub fn score_tags<S: AsRef<str>, T: AsRef<str>>(
    gold: &[S],
    predicted: &[T],
    metric: ScoreMetric,
) -> Result<f64> {
    if gold.len() != predicted.len() {
        return Err(NerveError::LengthMismatch {
            tokens: gold.len(),
            tags: predicted.len(),
        });
    }

    if metric == ScoreMetric::Accuracy {
        if gold.is_empty() {
            return Ok(1.0);
        }
        let correct = gold
            .iter()
            .zip(predicted)
            .filter(|(g, p)| {
                let (g, p): (&str, &str) = (g.as_ref(), p.as_ref());
                g == p
            })
            .count();
        return Ok(correct as f64 / gold.len() as f64);
    }

    let (precision, recall, f1) = span_prf(&decode_spans(gold), &decode_spans(predicted));
    Ok(match metric {
        ScoreMetric::Precision => precision,
        ScoreMetric::Recall => recall,
        _ => f1,
    })
}

/// Decodes an example with the model and compares against its gold tags.
pub struct TagScorer<'a> {
    word_vocab: &'a Vocab,
    tag_vocab: &'a Vocab,
    metric: ScoreMetric,
}

impl<'a> TagScorer<'a> {
    pub fn new(word_vocab: &'a Vocab, tag_vocab: &'a Vocab, metric: ScoreMetric) -> Self {
        Self {
            word_vocab,
            tag_vocab,
            metric,
        }
    }
}

impl Scorer for TagScorer<'_> {
    fn score(&self, model: &dyn SequenceTagger, example: &TaggedExample) -> Result<f64> {
        let inputs = vec![self.word_vocab.encode(&example.tokens)];
        let predicted = model.decode(&inputs)?.pop().unwrap_or_default();
        let predicted = self.tag_vocab.decode(&predicted);
        score_tags(&example.tags, &predicted, self.metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;

    use crate::dataset::Batch;

    /// Tags every token with a fixed index.
    struct ConstantTagger(u32);

    impl SequenceTagger for ConstantTagger {
        fn log_likelihood(&self, _batch: &Batch) -> Result<Tensor> {
            Ok(Tensor::new(0f32, &candle_core::Device::Cpu)?)
        }

        fn decode(&self, inputs: &[Vec<u32>]) -> Result<Vec<Vec<u32>>> {
            Ok(inputs.iter().map(|seq| vec![self.0; seq.len()]).collect())
        }

        fn set_training(&mut self, _training: bool) {}
    }

    #[test]
    fn test_span_prf() {
        let gold = vec![Span::new(0, 1, "PER"), Span::new(3, 3, "LOC")];
        let predicted = vec![Span::new(0, 1, "PER"), Span::new(3, 3, "ORG")];
        let (p, r, f1) = span_prf(&gold, &predicted);
        assert_eq!(p, 0.5);
        assert_eq!(r, 0.5);
        assert_eq!(f1, 0.5);
    }

    #[test]
    fn test_no_entities_is_perfect() {
        assert_eq!(span_prf(&[], &[]), (1.0, 1.0, 1.0));
        assert_eq!(score_tags(&["O", "O"], &["O", "O"], ScoreMetric::F1).unwrap(), 1.0);
    }

    #[test]
    fn test_missed_entities() {
        let score = score_tags(&["B-PER", "O"], &["O", "O"], ScoreMetric::F1).unwrap();
        assert_eq!(score, 0.0);
        let recall = score_tags(&["B-PER", "B-LOC"], &["B-PER", "O"], ScoreMetric::Recall).unwrap();
        assert_eq!(recall, 0.5);
    }

    #[test]
    fn test_accuracy() {
        let acc = score_tags(
            &["B-PER", "I-PER", "O", "O"],
            &["B-PER", "O", "O", "O"],
            ScoreMetric::Accuracy,
        )
        .unwrap();
        assert_eq!(acc, 0.75);
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("F1".parse::<ScoreMetric>().unwrap(), ScoreMetric::F1);
        assert_eq!("acc".parse::<ScoreMetric>().unwrap(), ScoreMetric::Accuracy);
        assert!("bleu".parse::<ScoreMetric>().is_err());
    }

    #[test]
    fn test_tag_scorer_with_model() {
        let words = Vocab::from_itos(vec!["<unk>".into(), "<pad>".into(), "Paris".into()]);
        let tags = Vocab::from_itos(vec!["O".into(), "B-LOC".into()]);
        let example = TaggedExample::new(
            vec!["Paris".into(), "Paris".into()],
            vec!["B-LOC".into(), "B-LOC".into()],
        )
        .unwrap();

        let perfect = TagScorer::new(&words, &tags, ScoreMetric::F1);
        assert_eq!(perfect.score(&ConstantTagger(1), &example).unwrap(), 1.0);
        assert_eq!(perfect.score(&ConstantTagger(0), &example).unwrap(), 0.0);
    }
}
