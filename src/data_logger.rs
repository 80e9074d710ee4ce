//! Buffered, append-only persistence of processed records as
//! newline-delimited JSON, one file per UTC calendar day.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;
use crate::protocol::ProcessedRecord;

const BUFFER_SIZE: usize = 50;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub data: Value,
}

pub struct PersistentLogger {
    log_dir: PathBuf,
    buffer: Vec<LogEntry>,
}

impl PersistentLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            buffer: Vec::with_capacity(BUFFER_SIZE),
        }
    }

    /// Buffer one record; flushes once the buffer reaches capacity. Flush
    /// failures are logged and never propagate to the message handler.
    pub fn log(&mut self, record: &ProcessedRecord) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            data: serde_json::to_value(record).unwrap_or(Value::Null),
        };
        self.buffer.push(entry);

        if self.buffer.len() >= BUFFER_SIZE {
            if let Err(e) = self.flush() {
                error!("error writing log file: {e}");
            }
        }
    }

    /// Append the buffered entries to today's file and clear the buffer.
    /// The buffer is cleared even when the write fails, so a failed flush
    /// loses that batch rather than growing without bound.
    pub fn flush(&mut self) -> Result<(), BridgeError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = self.write_batch();
        self.buffer.clear();
        result
    }

    fn write_batch(&self) -> Result<(), BridgeError> {
        fs::create_dir_all(&self.log_dir)?;

        let mut lines = String::new();
        for entry in &self.buffer {
            let line = serde_json::to_string(entry)
                .map_err(|e| BridgeError::InvalidJson(e.to_string()))?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_log_path())?;
        file.write_all(lines.as_bytes())?;

        info!("logged {} sensor readings", self.buffer.len());
        Ok(())
    }

    fn current_log_path(&self) -> PathBuf {
        let day = Utc::now().format("%Y-%m-%d");
        self.log_dir.join(format!("sensors_{day}.jsonl"))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Names of the jsonl files in the log directory; empty when the
    /// directory does not exist yet.
    pub fn list_log_files(&self) -> Vec<String> {
        let mut files: Vec<String> = fs::read_dir(&self.log_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter(|name| name.ends_with(".jsonl"))
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Read and parse one day file. A missing, traversal-attempting or
    /// unparsable file surfaces as `LogFileNotFound` for the caller to map
    /// to a 404, never a crash.
    pub fn read_log_file(&self, filename: &str) -> Result<Vec<LogEntry>, BridgeError> {
        if filename.contains('/') || filename.contains("..") {
            return Err(BridgeError::LogFileNotFound);
        }
        let path = self.log_dir.join(filename);
        let content = fs::read_to_string(&path).map_err(|_| BridgeError::LogFileNotFound)?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|_| BridgeError::LogFileNotFound))
            .collect()
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> ProcessedRecord {
        ProcessedRecord {
            timestamp: Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    #[test]
    fn buffer_flushes_at_capacity() {
        let dir = TempDir::new().unwrap();
        let mut logger = PersistentLogger::new(dir.path());

        for _ in 0..BUFFER_SIZE - 1 {
            logger.log(&record());
        }
        assert_eq!(logger.buffered(), BUFFER_SIZE - 1);
        assert!(logger.list_log_files().is_empty());

        logger.log(&record());
        assert_eq!(logger.buffered(), 0);

        let files = logger.list_log_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("sensors_"));
        assert!(files[0].ends_with(".jsonl"));

        let entries = logger.read_log_file(&files[0]).unwrap();
        assert_eq!(entries.len(), BUFFER_SIZE);
    }

    #[test]
    fn flush_appends_rather_than_overwrites() {
        let dir = TempDir::new().unwrap();
        let mut logger = PersistentLogger::new(dir.path());

        for _ in 0..BUFFER_SIZE {
            logger.log(&record());
        }
        for _ in 0..BUFFER_SIZE {
            logger.log(&record());
        }

        let files = logger.list_log_files();
        let entries = logger.read_log_file(&files[0]).unwrap();
        assert_eq!(entries.len(), 2 * BUFFER_SIZE);
    }

    #[test]
    fn explicit_flush_writes_partial_buffer() {
        let dir = TempDir::new().unwrap();
        let mut logger = PersistentLogger::new(dir.path());

        logger.log(&record());
        logger.log(&record());
        logger.flush().unwrap();
        assert_eq!(logger.buffered(), 0);

        let files = logger.list_log_files();
        let entries = logger.read_log_file(&files[0]).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn flush_on_empty_buffer_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut logger = PersistentLogger::new(dir.path());
        logger.flush().unwrap();
        assert!(logger.list_log_files().is_empty());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let logger = PersistentLogger::new(dir.path());
        assert!(matches!(
            logger.read_log_file("sensors_2000-01-01.jsonl"),
            Err(BridgeError::LogFileNotFound)
        ));
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let logger = PersistentLogger::new(dir.path());
        assert!(matches!(
            logger.read_log_file("../etc/passwd"),
            Err(BridgeError::LogFileNotFound)
        ));
    }

    #[test]
    fn unparsable_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("sensors_bad.jsonl"), "not json\n").unwrap();
        let logger = PersistentLogger::new(dir.path());
        assert!(matches!(
            logger.read_log_file("sensors_bad.jsonl"),
            Err(BridgeError::LogFileNotFound)
        ));
    }
}
