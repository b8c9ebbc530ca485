//! Scalar metric sinks for training runs.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nerve_core::Result;
use serde::{Deserialize, Serialize};

/// Receives scalar metrics keyed by epoch.
pub trait MetricsObserver {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: MetricsObserver + ?Sized> MetricsObserver for Box<T> {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        (**self).add_scalar(tag, value, step)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Discards every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MetricsObserver for NoopObserver {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _step: usize) -> Result<()> {
        Ok(())
    }
}

/// One recorded scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub value: f64,
    pub step: usize,
}

/// Keeps metrics in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryObserver {
    pub records: Vec<ScalarRecord>,
}

impl MetricsObserver for MemoryObserver {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.records.push(ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
        });
        Ok(())
    }
}

/// Writes one JSON object per scalar, one per line.
pub struct JsonlObserver<W: Write> {
    writer: W,
}

impl JsonlObserver<BufWriter<File>> {
    /// Create (or truncate) a JSON-lines metrics file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonlObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MetricsObserver for JsonlObserver<W> {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let record = ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
