//! Traits for log persistence backends.
//!
//! This module provides the [`Driver`] trait, the capability a
//! [`LogNode`](crate::node::LogNode) persists through. The bundled
//! implementation is [`TextDriver`](crate::file_store::TextDriver).

use std::path::Path;

use crate::error::Result;
use crate::types::LogEvent;

/// Trait for log persistence backends.
///
/// Every method is a self-contained transaction. Implementors must tolerate
/// concurrent calls from several threads, although nodes only call them from
/// their own serial queue.
pub trait Driver: Send + Sync {
    /// Media type of the stored content, used when exporting it.
    fn media_type(&self) -> &str;

    /// Location of the backing file.
    fn path(&self) -> &Path;

    /// File name used for exported attachments.
    fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Reads every stored event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened or read.
    fn read_all(&self) -> Result<Vec<LogEvent>>;

    /// Reads up to `count` events stored after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read.
    fn read_after(&self, anchor: &LogEvent, count: usize) -> Result<Vec<LogEvent>>;

    /// Reads up to `count` events stored before `anchor`, in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read.
    fn read_before(&self, anchor: &LogEvent, count: usize) -> Result<Vec<LogEvent>>;

    /// Returns the raw stored bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be read.
    fn read_raw(&self) -> Result<Vec<u8>>;

    /// Appends one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be written.
    fn append(&self, event: &LogEvent) -> Result<()>;

    /// Truncates the store to empty.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation fails.
    fn clear(&self) -> Result<()>;

    /// Deletes the backing file. Later operations recreate it.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails for a reason other than absence.
    fn remove(&self) -> Result<()>;
}
