//! Data loading and batching for IOB-tagged training data.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::{NerveError, Result};
use crate::vocab::Vocab;

/// A single training example: aligned token and tag sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedExample {
    pub tokens: Vec<String>,
    pub tags: Vec<String>,
}

impl TaggedExample {
    pub fn new(tokens: Vec<String>, tags: Vec<String>) -> Result<Self> {
        if tokens.len() != tags.len() {
            return Err(NerveError::LengthMismatch {
                tokens: tokens.len(),
                tags: tags.len(),
            });
        }
        Ok(Self { tokens, tags })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Load a dataset in CoNLL column format.
///
/// One token per line, the token in the first column and its tag in the last
/// one. Blank lines separate sentences; `#` comments and `-DOCSTART-` lines
/// are skipped.
pub fn load_conll<P: AsRef<Path>>(path: P) -> Result<Vec<TaggedExample>> {
    let file = File::open(path.as_ref())?;
    let examples = parse_conll(BufReader::new(file))?;
    debug!(
        path = %path.as_ref().display(),
        examples = examples.len(),
        "loaded dataset"
    );
    Ok(examples)
}

/// Parse CoNLL column data from any buffered reader.
pub fn parse_conll<R: BufRead>(reader: R) -> Result<Vec<TaggedExample>> {
    let mut examples = Vec::new();
    let mut current_tokens = Vec::new();
    let mut current_tags = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            if !current_tokens.is_empty() {
                examples.push(TaggedExample {
                    tokens: std::mem::take(&mut current_tokens),
                    tags: std::mem::take(&mut current_tags),
                });
            }
            continue;
        }

        if line.starts_with('#') || line.starts_with("-DOCSTART-") {
            continue;
        }

        let columns: Vec<&str> = line.split_whitespace().collect();
        match (columns.first(), columns.last()) {
            (Some(token), Some(tag)) if columns.len() >= 2 => {
                current_tokens.push(token.to_string());
                current_tags.push(tag.to_string());
            }
            _ => {
                return Err(NerveError::MalformedLine {
                    line: line_no + 1,
                    content: line.to_string(),
                });
            }
        }
    }

    // Don't forget the last example
    if !current_tokens.is_empty() {
        examples.push(TaggedExample {
            tokens: current_tokens,
            tags: current_tags,
        });
    }

    Ok(examples)
}

/// A mini-batch of encoded sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Word indices, one vector per sequence.
    pub inputs: Vec<Vec<u32>>,
    /// True length of each sequence.
    pub lengths: Vec<usize>,
    /// Gold tag indices, aligned to `inputs`.
    pub tags: Vec<Vec<u32>>,
}

impl Batch {
    /// Batch width (number of sequences).
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Length of the longest sequence.
    pub fn max_len(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0)
    }

    /// Inputs padded to `max_len()` with `pad_index`.
    pub fn padded_inputs(&self, pad_index: u32) -> Vec<Vec<u32>> {
        let width = self.max_len();
        self.inputs
            .iter()
            .map(|seq| {
                let mut row = seq.clone();
                row.resize(width, pad_index);
                row
            })
            .collect()
    }
}

/// Encodes a dataset once and yields shuffled mini-batches per epoch.
#[derive(Debug, Clone)]
pub struct BatchIterator {
    inputs: Vec<Vec<u32>>,
    tags: Vec<Vec<u32>>,
    batch_size: usize,
    seed: u64,
}

impl BatchIterator {
    /// Encode `examples` with the given vocabularies.
    ///
    /// Empty sentences are skipped; tags missing from `tag_vocab` are an error.
    pub fn new(
        examples: &[TaggedExample],
        word_vocab: &Vocab,
        tag_vocab: &Vocab,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(NerveError::InvalidConfig("batch_size must be > 0".into()));
        }

        let mut inputs = Vec::with_capacity(examples.len());
        let mut tags = Vec::with_capacity(examples.len());
        for example in examples.iter().filter(|e| !e.is_empty()) {
            inputs.push(word_vocab.encode(&example.tokens));
            let encoded = example
                .tags
                .iter()
                .map(|tag| {
                    tag_vocab
                        .index(tag)
                        .ok_or_else(|| NerveError::InvalidConfig(format!("unknown tag {tag:?}")))
                })
                .collect::<Result<Vec<_>>>()?;
            tags.push(encoded);
        }

        if inputs.is_empty() {
            return Err(NerveError::EmptyDataset("no non-empty training sentences".into()));
        }

        Ok(Self {
            inputs,
            tags,
            batch_size,
            seed,
        })
    }

    /// Number of encoded sequences.
    pub fn num_examples(&self) -> usize {
        self.inputs.len()
    }

    /// Number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        self.inputs.len().div_ceil(self.batch_size)
    }

    /// Batches for `epoch`, in an order determined by the seed and epoch.
    pub fn epoch(&self, epoch: usize) -> Vec<Batch> {
        let mut order: Vec<usize> = (0..self.inputs.len()).collect();
        let mut rng = oorandom::Rand32::new(self.seed.wrapping_add(epoch as u64));
        for i in (1..order.len()).rev() {
            let j = rng.rand_range(0..(i as u32 + 1)) as usize;
            order.swap(i, j);
        }

        order
            .chunks(self.batch_size)
            .map(|chunk| Batch {
                inputs: chunk.iter().map(|&i| self.inputs[i].clone()).collect(),
                lengths: chunk.iter().map(|&i| self.inputs[i].len()).collect(),
                tags: chunk.iter().map(|&i| self.tags[i].clone()).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
-DOCSTART- -X- O

John NNP B-PER
Smith NNP I-PER
said VBD O

# comment
Paris NNP B-LOC
";

    fn sample() -> Vec<TaggedExample> {
        parse_conll(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_conll() {
        let examples = sample();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].tokens, vec!["John", "Smith", "said"]);
        assert_eq!(examples[0].tags, vec!["B-PER", "I-PER", "O"]);
        // Trailing sentence without a blank line is kept.
        assert_eq!(examples[1].tokens, vec!["Paris"]);
        assert_eq!(examples[1].tags, vec!["B-LOC"]);
    }

    #[test]
    fn test_parse_conll_tab_separated() {
        let examples = parse_conll("EU\tB-ORG\nrejects\tO\n".as_bytes()).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].tags, vec!["B-ORG", "O"]);
    }

    #[test]
    fn test_malformed_line() {
        let err = parse_conll("John B-PER\nlonely\n".as_bytes()).unwrap_err();
        match err {
            NerveError::MalformedLine { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, "lonely");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_example_length_check() {
        let err = TaggedExample::new(vec!["a".into()], vec![]).unwrap_err();
        assert!(matches!(err, NerveError::LengthMismatch { .. }));
    }

    #[test]
    fn test_batches_cover_dataset() {
        let examples = sample();
        let words = Vocab::words(&[&examples], 1);
        let tags = Vocab::tags(&[&examples]);
        let iter = BatchIterator::new(&examples, &words, &tags, 1, 7).unwrap();

        assert_eq!(iter.num_batches(), 2);
        let batches = iter.epoch(0);
        assert_eq!(batches.len(), 2);
        let mut lengths: Vec<usize> = batches.iter().flat_map(|b| b.lengths.clone()).collect();
        lengths.sort_unstable();
        assert_eq!(lengths, vec![1, 3]);
    }

    #[test]
    fn test_epoch_is_deterministic() {
        let examples = sample();
        let words = Vocab::words(&[&examples], 1);
        let tags = Vocab::tags(&[&examples]);
        let iter = BatchIterator::new(&examples, &words, &tags, 1, 2019).unwrap();
        assert_eq!(iter.epoch(3), iter.epoch(3));
    }

    #[test]
    fn test_padded_inputs() {
        let batch = Batch {
            inputs: vec![vec![5, 6, 7], vec![8]],
            lengths: vec![3, 1],
            tags: vec![vec![0, 1, 0], vec![2]],
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.max_len(), 3);
        assert_eq!(batch.padded_inputs(1), vec![vec![5, 6, 7], vec![8, 1, 1]]);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let examples = sample();
        let words = Vocab::words(&[&examples], 1);
        let tags = Vocab::tags(&[&examples]);
        assert!(BatchIterator::new(&examples, &words, &tags, 0, 0).is_err());
    }
}
