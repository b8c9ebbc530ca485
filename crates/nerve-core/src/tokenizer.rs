//! # Tokenizer for Raw Prediction Input
//!
//! Splits free text into tokens for sequence labeling, keeping byte offsets
//! so decoded spans can be mapped back onto the original string.

/// A token extracted from raw text with positional information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token text content
    pub text: String,
    /// Start byte position in the original string
    pub start: usize,
    /// End byte position in the original string (exclusive)
    pub end: usize,
}

/// Whitespace tokenizer with optional punctuation splitting.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    split_punctuation: bool,
}

impl Tokenizer {
    /// Create a tokenizer that splits on whitespace only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit ASCII punctuation characters as standalone tokens.
    pub fn with_punctuation_split(mut self, enabled: bool) -> Self {
        self.split_punctuation = enabled;
        self
    }

    /// Tokenize a string into a sequence of tokens.
    ///
    /// # Examples
    /// ```
    /// use nerve_core::tokenizer::Tokenizer;
    ///
    /// let tokens = Tokenizer::new().with_punctuation_split(true).tokenize("Hello, Paris!");
    /// let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
    /// assert_eq!(texts, ["Hello", ",", "Paris", "!"]);
    /// ```
    pub fn tokenize(&self, input: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut current_start: Option<usize> = None;

        for (idx, c) in input.char_indices() {
            let is_punct = self.split_punctuation && c.is_ascii_punctuation();
            if c.is_whitespace() || is_punct {
                if let Some(start) = current_start.take() {
                    tokens.push(Self::token(input, start, idx));
                }
                if is_punct {
                    tokens.push(Self::token(input, idx, idx + c.len_utf8()));
                }
            } else if current_start.is_none() {
                current_start = Some(idx);
            }
        }

        // Emit final token if non-empty
        if let Some(start) = current_start {
            tokens.push(Self::token(input, start, input.len()));
        }

        tokens
    }

    fn token(input: &str, start: usize, end: usize) -> Token {
        Token {
            text: input[start..end].to_string(),
            start,
            end,
        }
    }

    /// Get the original byte range covered by tokens `start_idx..=end_idx`.
    pub fn get_span(tokens: &[Token], start_idx: usize, end_idx: usize) -> Option<(usize, usize)> {
        if start_idx > end_idx || end_idx >= tokens.len() {
            return None;
        }
        Some((tokens[start_idx].start, tokens[end_idx].end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = Tokenizer::new().tokenize("  John Smith  visited Paris ");

        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["John", "Smith", "visited", "Paris"]);
        assert_eq!(tokens[0].start, 2);
        assert_eq!(tokens[0].end, 6);
    }

    #[test]
    fn test_punctuation_kept_without_split() {
        let tokens = Tokenizer::new().tokenize("U.S. troops");
        assert_eq!(tokens[0].text, "U.S.");
    }

    #[test]
    fn test_punctuation_split() {
        let tokens = Tokenizer::new()
            .with_punctuation_split(true)
            .tokenize("(Berlin)");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["(", "Berlin", ")"]);
    }

    #[test]
    fn test_multibyte() {
        let tokens = Tokenizer::new().tokenize("Zoë München");
        assert_eq!(tokens[1].text, "München");
        assert_eq!(&"Zoë München"[tokens[1].start..tokens[1].end], "München");
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(Tokenizer::new().tokenize("").is_empty());
        assert!(Tokenizer::new().tokenize("   \t\n").is_empty());
    }

    #[test]
    fn test_get_span() {
        let text = "John Smith visited Paris";
        let tokens = Tokenizer::new().tokenize(text);

        let (start, end) = Tokenizer::get_span(&tokens, 0, 1).unwrap();
        assert_eq!(&text[start..end], "John Smith");
        assert!(Tokenizer::get_span(&tokens, 2, 9).is_none());
    }
}
