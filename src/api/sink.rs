//! Output boundary: where emitted position records go

use crate::api::types::PositionRecord;
use crate::transport::{Publisher, TransportError};
use crate::utils::config::OutputConfig;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Record sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("publish failed: {0}")]
    Transport(#[from] TransportError),
}

/// Destination for encoded position records.
///
/// Failures are reported to the caller, which logs and carries on.
pub trait RecordSink: Send {
    /// Short label used in diagnostics
    fn name(&self) -> &str;

    /// Deliver one record; `json` is its compact single-line encoding
    fn emit(&mut self, record: &PositionRecord, json: &str) -> Result<(), SinkError>;
}

/// Append-only log with one JSON record per line
pub struct JsonLineLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLineLog {
    /// Open the log described by the output configuration
    pub fn open(config: &OutputConfig) -> Result<Self, SinkError> {
        Self::open_path(&config.log_file, config.truncate)
    }

    /// Open `path`, discarding earlier contents when `truncate` is set
    pub fn open_path<P: AsRef<Path>>(path: P, truncate: bool) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }

        let file = options.open(&path).map_err(|source| SinkError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), truncate, "record log opened");

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonLineLog {
    fn name(&self) -> &str {
        "record-log"
    }

    fn emit(&mut self, _record: &PositionRecord, json: &str) -> Result<(), SinkError> {
        writeln!(self.writer, "{}", json)
            .and_then(|_| self.writer.flush())
            .map_err(|source| SinkError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }
}

/// Publishes every record on a fixed topic
pub struct TopicPublisher {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl TopicPublisher {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

impl RecordSink for TopicPublisher {
    fn name(&self) -> &str {
        &self.topic
    }

    fn emit(&mut self, _record: &PositionRecord, json: &str) -> Result<(), SinkError> {
        self.publisher.publish(&self.topic, json)?;
        Ok(())
    }
}
