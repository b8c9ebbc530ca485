//! # IOB Tags for Named Entity Recognition
//!
//! Parses and formats the tag strings used by sequence labeling datasets.
//! Uses the IOB (Inside-Outside-Begin) scheme with open-ended entity types:
//! `O`, `B-<TYPE>` and `I-<TYPE>`.

use std::fmt;

/// Tag string for tokens outside any entity.
pub const OUTSIDE: &str = "O";

/// A parsed IOB tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IobTag {
    /// First token of an entity of the given type.
    Begin(String),
    /// Continuation token of an entity of the given type.
    Inside(String),
    /// Outside (irrelevant token).
    Outside,
}

impl IobTag {
    /// Parse a tag string.
    ///
    /// Parsing is lenient: a tag that is neither `O` nor carries a `B-`/`I-`
    /// prefix is read as the beginning of an entity named by the whole string,
    /// so single-label schemes such as `PER` still produce spans.
    pub fn parse(tag: &str) -> Self {
        if tag == OUTSIDE || tag.is_empty() {
            return IobTag::Outside;
        }
        match tag.split_once('-') {
            Some(("B", entity)) if !entity.is_empty() => IobTag::Begin(entity.to_string()),
            Some(("I", entity)) if !entity.is_empty() => IobTag::Inside(entity.to_string()),
            _ => IobTag::Begin(tag.to_string()),
        }
    }

    /// Check if this is a "Begin" tag.
    pub fn is_begin(&self) -> bool {
        matches!(self, IobTag::Begin(_))
    }

    /// Check if this is an "Inside" tag.
    pub fn is_inside(&self) -> bool {
        matches!(self, IobTag::Inside(_))
    }

    /// Get the entity type for this tag.
    pub fn entity_type(&self) -> Option<&str> {
        match self {
            IobTag::Begin(entity) | IobTag::Inside(entity) => Some(entity),
            IobTag::Outside => None,
        }
    }

    /// Check if transitioning from `from` tag to `to` tag is valid.
    ///
    /// `I-X` may only follow `B-X` or `I-X`; everything else is allowed.
    pub fn is_valid_transition(from: &IobTag, to: &IobTag) -> bool {
        match to {
            IobTag::Inside(entity) => from.entity_type() == Some(entity.as_str()),
            _ => true,
        }
    }

    /// Check if a tag may open a sequence (no `I-*` at position 0).
    pub fn is_valid_start(&self) -> bool {
        !self.is_inside()
    }
}

impl fmt::Display for IobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IobTag::Begin(entity) => write!(f, "B-{entity}"),
            IobTag::Inside(entity) => write!(f, "I-{entity}"),
            IobTag::Outside => write!(f, "{OUTSIDE}"),
        }
    }
}

impl From<&str> for IobTag {
    fn from(tag: &str) -> Self {
        IobTag::parse(tag)
    }
}
