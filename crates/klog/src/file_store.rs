//! File-based log storage with size-capped rotation.
//!
//! This module provides:
//! - [`TextDriver`]: A human-readable, append-only line store
//! - [`TextDriverConfig`]: Path, size cap, trim margin and read chunking
//! - [`TrimPolicy`]: Where the oldest bytes are cut when the cap is hit
//!
//! Every operation runs as a transaction: open (creating the file), act,
//! `sync_all`, close. A mutex keeps transactions on one store from overlapping.
//!
//! When an append would push the file past `max_size`, the oldest
//! `overweight + margin_size` bytes are discarded in one pass before writing.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::traits::Driver;
use crate::types::LogEvent;

/// How the retained tail is aligned after trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimPolicy {
    /// Cut at the exact byte offset. The first retained line may be partial.
    #[default]
    ByteOffset,
    /// Advance the cut to the next line boundary so only whole lines remain.
    LineAligned,
}

/// Configuration for a [`TextDriver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDriverConfig {
    /// Backing file.
    pub path: PathBuf,
    /// Cap on the file size in bytes.
    pub max_size: u64,
    /// Extra bytes dropped on each trim, so trims are not triggered every line.
    pub margin_size: u64,
    /// Line delimiter.
    pub delimiter: String,
    /// Buffer size for chunked reads.
    pub chunk_size: usize,
    /// Alignment of the cut when trimming.
    pub trim_policy: TrimPolicy,
}

impl Default for TextDriverConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("klog.log"),
            max_size: 5 * 1024 * 1024, // 5 MB
            margin_size: 100 * 1024,   // 100 KB
            delimiter: "\n".to_string(),
            chunk_size: 4096,
            trim_policy: TrimPolicy::ByteOffset,
        }
    }
}

impl TextDriverConfig {
    /// Creates a new config for the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the size cap.
    #[must_use]
    pub const fn with_max_size(mut self, size: u64) -> Self {
        self.max_size = size;
        self
    }

    /// Sets the trim margin.
    #[must_use]
    pub const fn with_margin_size(mut self, size: u64) -> Self {
        self.margin_size = size;
        self
    }

    /// Sets the line delimiter.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Sets the read chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the trim policy.
    #[must_use]
    pub const fn with_trim_policy(mut self, policy: TrimPolicy) -> Self {
        self.trim_policy = policy;
        self
    }

    /// Checks the invariants `max_size > margin_size`, `chunk_size > 0` and a
    /// non-empty delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] naming the violated bound.
    pub fn validate(&self) -> Result<()> {
        if self.max_size <= self.margin_size {
            return Err(LogError::InvalidConfig(format!(
                "max_size ({}) must exceed margin_size ({})",
                self.max_size, self.margin_size
            )));
        }
        if self.chunk_size == 0 {
            return Err(LogError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.delimiter.is_empty() {
            return Err(LogError::InvalidConfig(
                "delimiter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Append-only text line store with a size cap.
pub struct TextDriver {
    config: TextDriverConfig,
    /// Held for the whole of each transaction.
    lock: Mutex<()>,
}

impl TextDriver {
    /// Creates a driver, validating the configuration.
    ///
    /// The file itself is created lazily by the first transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: TextDriverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            lock: Mutex::new(()),
        })
    }

    /// Creates a driver with default limits for the given file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(TextDriverConfig::new(path))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TextDriverConfig {
        &self.config
    }

    /// Returns the current size of the backing file, 0 when absent.
    #[must_use]
    pub fn size(&self) -> u64 {
        let _guard = self.lock.lock();
        fs::metadata(&self.config.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Reads every line without parsing, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn read_lines(&self) -> Result<Vec<String>> {
        self.transaction(|tx| {
            let mut lines = Vec::new();
            while let Some(line) = tx.read_line()? {
                lines.push(line);
            }
            Ok(lines)
        })
    }

    fn transaction<T>(&self, act: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock();
        let mut tx = Transaction::begin(&self.config)?;
        let out = act(&mut tx)?;
        tx.end()?;
        Ok(out)
    }
}

impl Driver for TextDriver {
    fn media_type(&self) -> &str {
        "text/plain"
    }

    fn path(&self) -> &Path {
        &self.config.path
    }

    fn read_all(&self) -> Result<Vec<LogEvent>> {
        Ok(self
            .read_lines()?
            .iter()
            .map(|line| LogEvent::parse_line(line))
            .collect())
    }

    fn read_after(&self, anchor: &LogEvent, count: usize) -> Result<Vec<LogEvent>> {
        let events = self.read_all()?;
        Ok(events
            .into_iter()
            .skip_while(|e| !e.same_record(anchor))
            .skip(1)
            .take(count)
            .collect())
    }

    fn read_before(&self, anchor: &LogEvent, count: usize) -> Result<Vec<LogEvent>> {
        let mut events = self.read_all()?;
        let Some(pos) = events.iter().position(|e| e.same_record(anchor)) else {
            return Ok(Vec::new());
        };
        events.truncate(pos);
        Ok(events.split_off(pos.saturating_sub(count)))
    }

    fn read_raw(&self) -> Result<Vec<u8>> {
        self.transaction(|tx| {
            let mut raw = Vec::new();
            tx.file.read_to_end(&mut raw)?;
            Ok(raw)
        })
    }

    fn append(&self, event: &LogEvent) -> Result<()> {
        let line = event.to_line();
        self.transaction(|tx| tx.write_line(&line))
    }

    fn clear(&self) -> Result<()> {
        self.transaction(|tx| {
            tx.file.set_len(0)?;
            Ok(())
        })
    }

    fn remove(&self) -> Result<()> {
        let _guard = self.lock.lock();
        match fs::remove_file(&self.config.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// One open→act→sync→close pass over the backing file.
struct Transaction<'a> {
    config: &'a TextDriverConfig,
    file: File,
    buffer: Vec<u8>,
    chunk: Vec<u8>,
    at_eof: bool,
}

impl<'a> Transaction<'a> {
    fn begin(config: &'a TextDriverConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.path)?;
        Ok(Self {
            config,
            file,
            buffer: Vec::with_capacity(config.chunk_size),
            chunk: vec![0u8; config.chunk_size],
            at_eof: false,
        })
    }

    fn end(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Returns the next line, or `None` once the file is exhausted.
    fn read_line(&mut self) -> Result<Option<String>> {
        let delimiter = self.config.delimiter.as_bytes();
        loop {
            if let Some(pos) = find(&self.buffer, delimiter) {
                let line = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
                self.buffer.drain(..pos + delimiter.len());
                return Ok(Some(line));
            }
            if self.at_eof {
                return Ok(None);
            }
            let read = self.file.read(&mut self.chunk)?;
            if read == 0 {
                self.at_eof = true;
                if !self.buffer.is_empty() {
                    // Last line, not terminated by a delimiter.
                    let line = String::from_utf8_lossy(&self.buffer).into_owned();
                    self.buffer.clear();
                    return Ok(Some(line));
                }
            } else {
                self.buffer.extend_from_slice(&self.chunk[..read]);
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let delimiter = self.config.delimiter.as_bytes();
        let mut data = Vec::with_capacity(line.len() + delimiter.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(delimiter);

        let size = self.file.seek(SeekFrom::End(0))?;
        let total = size + data.len() as u64;
        if total > self.config.max_size {
            let overweight = total - self.config.max_size;
            let cut = overweight + self.config.margin_size;
            let retained = self.tail_from(cut)?;
            self.file.set_len(0)?;
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(&retained)?;
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&data)?;
        Ok(())
    }

    /// Reads the bytes kept after cutting at `cut`, honoring the trim policy.
    fn tail_from(&mut self, cut: u64) -> Result<Vec<u8>> {
        match self.config.trim_policy {
            TrimPolicy::ByteOffset => {
                self.file.seek(SeekFrom::Start(cut))?;
                let mut tail = Vec::new();
                self.file.read_to_end(&mut tail)?;
                Ok(tail)
            }
            TrimPolicy::LineAligned => {
                // Start one delimiter early so a boundary exactly at `cut` is found.
                let delimiter = self.config.delimiter.as_bytes();
                let start = cut.saturating_sub(delimiter.len() as u64);
                self.file.seek(SeekFrom::Start(start))?;
                let mut tail = Vec::new();
                self.file.read_to_end(&mut tail)?;
                match find(&tail, delimiter) {
                    Some(pos) => Ok(tail.split_off(pos + delimiter.len())),
                    None => Ok(Vec::new()),
                }
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
