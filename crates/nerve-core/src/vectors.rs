//! Pretrained word vectors in whitespace-separated text format.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{NerveError, Result};
use crate::vocab::Vocab;

/// Read vectors for the words of `vocab` from `path`.
///
/// Each line is `word v1 v2 ... vd`. A leading word2vec header line
/// (`count dim`) is skipped. Words missing from the vocabulary are ignored;
/// rows whose length differs from `dim` are an error.
pub fn load_vectors<P: AsRef<Path>>(path: P, vocab: &Vocab, dim: usize) -> Result<Vec<(u32, Vec<f32>)>> {
    let file = File::open(path.as_ref())?;
    let rows = parse_vectors(BufReader::new(file), vocab, dim)?;
    if rows.is_empty() {
        warn!(path = %path.as_ref().display(), "no pretrained vector matches the vocabulary");
    }
    info!(
        path = %path.as_ref().display(),
        found = rows.len(),
        vocabulary = vocab.len(),
        "loaded pretrained vectors"
    );
    Ok(rows)
}

/// Parse vectors from any buffered reader.
pub fn parse_vectors<R: BufRead>(reader: R, vocab: &Vocab, dim: usize) -> Result<Vec<(u32, Vec<f32>)>> {
    let mut rows = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(word) = fields.next() else {
            continue;
        };
        let values: Vec<&str> = fields.collect();

        if line_no == 0 && values.len() == 1 && word.parse::<usize>().is_ok() {
            continue;
        }

        let Some(index) = vocab.index(word) else {
            continue;
        };
        if values.len() != dim {
            return Err(NerveError::VectorDimension {
                word: word.to_string(),
                expected: dim,
                found: values.len(),
            });
        }

        let vector = values
            .iter()
            .map(|v| {
                v.parse::<f32>().map_err(|_| NerveError::MalformedLine {
                    line: line_no + 1,
                    content: line.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push((index, vector));
    }

    Ok(rows)
}
