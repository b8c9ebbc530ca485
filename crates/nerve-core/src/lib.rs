//! # Nerve Core
//!
//! Building blocks for BiLSTM-CRF named entity recognition: IOB tag parsing,
//! span decoding, vocabularies, CoNLL dataset loading, the candle-based
//! network with its CRF layer, and per-example scoring.
//!
//! ## Quick Start
//!
//! ```rust
//! use nerve_core::spans::{decode_entities, Span};
//!
//! let tokens = ["John", "Smith", "said", "Paris"];
//! let tags = ["B-PER", "I-PER", "O", "B-LOC"];
//! let entities = decode_entities(&tokens, &tags).unwrap();
//!
//! assert_eq!(entities[0].span, Span::new(0, 1, "PER"));
//! assert_eq!(entities[0].text, "John Smith");
//! assert_eq!(entities[1].text, "Paris");
//! ```
pub mod crf;
pub mod dataset;
pub mod error;
pub mod model;
pub mod scorer;
pub mod spans;
pub mod tags;
pub mod tokenizer;
pub mod vectors;
pub mod viterbi;
pub mod vocab;

// Re-export primary API
pub use dataset::{load_conll, Batch, BatchIterator, TaggedExample};
pub use error::{NerveError, Result};
pub use model::{BiLstmCrf, ModelConfig, SequenceTagger, TrainableTagger};
pub use scorer::{ScoreMetric, Scorer, TagScorer};
pub use spans::{decode_entities, decode_spans, Entity, Span};
pub use tags::IobTag;
pub use tokenizer::{Token, Tokenizer};
pub use viterbi::ViterbiDecoder;
pub use vocab::Vocab;
