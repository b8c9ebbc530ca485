use thiserror::Error;

/// Errors that can occur while loading data, training or running a tagger.
#[derive(Debug, Error)]
pub enum NerveError {
    /// Reading or writing a dataset, vector file or checkpoint failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration or vocabulary file could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// A dataset line did not contain both a token and a tag column.
    #[error("malformed line {line}: {content:?}")]
    MalformedLine {
        /// 1-based line number in the source file.
        line: usize,
        /// The offending line.
        content: String,
    },

    /// Two sequences that must be aligned have different lengths.
    #[error("length mismatch: {tokens} tokens but {tags} tags")]
    LengthMismatch {
        /// Number of tokens.
        tokens: usize,
        /// Number of tags.
        tags: usize,
    },

    /// A dataset that must contain at least one example is empty.
    #[error("dataset is empty: {0}")]
    EmptyDataset(String),

    /// Predict or test was called before training or loading a model.
    #[error("model is not loaded; train or load a model first")]
    ModelNotLoaded,

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pretrained vector row has the wrong number of components.
    #[error("vector for {word:?} has {found} dimensions, expected {expected}")]
    VectorDimension {
        /// Word whose row is malformed.
        word: String,
        /// Embedding dimension of the model.
        expected: usize,
        /// Dimension found in the file.
        found: usize,
    },
}

/// Result type alias for nerve operations.
pub type Result<T> = std::result::Result<T, NerveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = NerveError::ModelNotLoaded;
        assert_eq!(
            err.to_string(),
            "model is not loaded; train or load a model first"
        );

        let err = NerveError::MalformedLine {
            line: 7,
            content: "lonely".into(),
        };
        assert!(err.to_string().contains("line 7"));
        assert!(err.to_string().contains("lonely"));

        let err = NerveError::LengthMismatch { tokens: 3, tags: 2 };
        assert_eq!(err.to_string(), "length mismatch: 3 tokens but 2 tags");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NerveError>();
    }
}
