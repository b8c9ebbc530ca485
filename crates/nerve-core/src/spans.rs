//! # Span Decoding
//!
//! Turns a flat sequence of IOB tags into labeled token ranges.
//!
//! Decoding is a single left-to-right pass and never fails on malformed
//! input: an `I-<TYPE>` that cannot continue the open span starts a new one,
//! so imperfect model predictions still produce usable entities.

use serde::{Deserialize, Serialize};

use crate::error::{NerveError, Result};
use crate::tags::IobTag;

/// A labeled token range. Both bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

impl Span {
    pub fn new(start: usize, end: usize, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    /// Number of tokens covered by the span; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// A decoded span together with its surface text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(flatten)]
    pub span: Span,
    pub text: String,
}

/// State of the span currently being built.
struct OpenSpan<'a> {
    start: usize,
    label: &'a str,
}

/// Decode IOB tags into spans, in left-to-right order.
///
/// # Examples
/// ```
/// use nerve_core::spans::{decode_spans, Span};
///
/// let spans = decode_spans(&["B-PER", "I-PER", "O", "B-LOC"]);
/// assert_eq!(spans, vec![Span::new(0, 1, "PER"), Span::new(3, 3, "LOC")]);
/// ```
pub fn decode_spans<T: AsRef<str>>(tags: &[T]) -> Vec<Span> {
    let parsed: Vec<IobTag> = tags.iter().map(|t| IobTag::parse(t.as_ref())).collect();

    let mut spans = Vec::new();
    let mut open: Option<OpenSpan<'_>> = None;

    for (idx, tag) in parsed.iter().enumerate() {
        match tag {
            IobTag::Outside => {
                if let Some(span) = open.take() {
                    spans.push(Span::new(span.start, idx - 1, span.label));
                }
            }
            IobTag::Begin(label) => {
                if let Some(span) = open.take() {
                    spans.push(Span::new(span.start, idx - 1, span.label));
                }
                open = Some(OpenSpan {
                    start: idx,
                    label: label.as_str(),
                });
            }
            IobTag::Inside(label) => {
                let continues = open
                    .as_ref()
                    .is_some_and(|span| span.label == label.as_str());
                if !continues {
                    if let Some(span) = open.take() {
                        spans.push(Span::new(span.start, idx - 1, span.label));
                    }
                    open = Some(OpenSpan {
                        start: idx,
                        label: label.as_str(),
                    });
                }
            }
        }
    }

    if let Some(span) = open {
        spans.push(Span::new(span.start, parsed.len() - 1, span.label));
    }

    spans
}

/// Decode tags aligned to `tokens` and attach the covered text to each span.
///
/// Tokens of a span are joined with a single space.
pub fn decode_entities<S: AsRef<str>, T: AsRef<str>>(
    tokens: &[S],
    tags: &[T],
) -> Result<Vec<Entity>> {
    if tokens.len() != tags.len() {
        return Err(NerveError::LengthMismatch {
            tokens: tokens.len(),
            tags: tags.len(),
        });
    }

    Ok(decode_spans(tags)
        .into_iter()
        .map(|span| {
            let text = tokens[span.start..=span.end]
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<&str>>()
                .join(" ");
            Entity { span, text }
        })
        .collect())
}

/// Rebuild a well-formed IOB sequence of length `len` from spans.
///
/// Spans reaching past `len` are clipped.
pub fn spans_to_tags(spans: &[Span], len: usize) -> Vec<String> {
    let mut tags = vec![IobTag::Outside.to_string(); len];
    for span in spans {
        if span.start >= len {
            continue;
        }
        tags[span.start] = IobTag::Begin(span.label.clone()).to_string();
        for tag in tags.iter_mut().take(span.end.min(len - 1) + 1).skip(span.start + 1) {
            *tag = IobTag::Inside(span.label.clone()).to_string();
        }
    }
    tags
}
