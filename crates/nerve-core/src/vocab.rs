//! Bidirectional string/index vocabularies for words and tags.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dataset::TaggedExample;

/// Token substituted for out-of-vocabulary words.
pub const UNK_TOKEN: &str = "<unk>";
/// Token used to pad word sequences.
pub const PAD_TOKEN: &str = "<pad>";

/// Which column of a tagged example a vocabulary is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Tokens,
    Tags,
}

/// Immutable mapping between strings and dense indices.
///
/// Serialized as the ordered `itos` list; the reverse map is rebuilt on load.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocab {
    itos: Vec<String>,
    stoi: HashMap<String, u32>,
    unk_index: Option<u32>,
}

impl Vocab {
    /// Build a vocabulary from one or more datasets.
    ///
    /// `specials` come first, in order. The remaining entries are sorted by
    /// descending frequency with ties broken lexicographically; entries seen
    /// fewer than `min_freq` times are left out.
    pub fn build(
        datasets: &[&[TaggedExample]],
        field: Field,
        specials: &[&str],
        min_freq: usize,
    ) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for example in datasets.iter().flat_map(|d| d.iter()) {
            let column = match field {
                Field::Tokens => &example.tokens,
                Field::Tags => &example.tags,
            };
            for item in column {
                *counts.entry(item.as_str()).or_default() += 1;
            }
        }

        let mut entries: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(item, count)| *count >= min_freq.max(1) && !specials.contains(item))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let itos = specials
            .iter()
            .copied()
            .chain(entries.into_iter().map(|(item, _)| item))
            .map(str::to_string)
            .collect();
        Self::from_itos(itos)
    }

    /// Word vocabulary with `<unk>` at index 0 and `<pad>` at index 1.
    pub fn words(datasets: &[&[TaggedExample]], min_freq: usize) -> Self {
        Self::build(datasets, Field::Tokens, &[UNK_TOKEN, PAD_TOKEN], min_freq)
    }

    /// Tag vocabulary without special entries.
    pub fn tags(datasets: &[&[TaggedExample]]) -> Self {
        Self::build(datasets, Field::Tags, &[], 1)
    }

    /// Rebuild a vocabulary from its ordered entries.
    pub fn from_itos(itos: Vec<String>) -> Self {
        let stoi: HashMap<String, u32> = itos
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.clone(), idx as u32))
            .collect();
        let unk_index = stoi.get(UNK_TOKEN).copied();
        Self {
            itos,
            stoi,
            unk_index,
        }
    }

    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    /// Index of `token`, if present.
    pub fn index(&self, token: &str) -> Option<u32> {
        self.stoi.get(token).copied()
    }

    /// Index of `token`, falling back to `<unk>`.
    ///
    /// Vocabularies without an unknown entry (tag vocabularies) fall back to 0.
    pub fn index_or_unk(&self, token: &str) -> u32 {
        self.index(token).or(self.unk_index).unwrap_or(0)
    }

    /// String for `index`, if in range.
    pub fn token(&self, index: u32) -> Option<&str> {
        self.itos.get(index as usize).map(String::as_str)
    }

    pub fn unk_index(&self) -> Option<u32> {
        self.unk_index
    }

    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        tokens.iter().map(|t| self.index_or_unk(t.as_ref())).collect()
    }

    /// Map indices back to strings; out-of-range indices become `<unk>`.
    pub fn decode(&self, indices: &[u32]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| self.token(i).unwrap_or(UNK_TOKEN).to_string())
            .collect()
    }

    pub fn itos(&self) -> &[String] {
        &self.itos
    }
}

impl Serialize for Vocab {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.itos.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Vocab {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<String>::deserialize(deserializer).map(Self::from_itos)
    }
}
