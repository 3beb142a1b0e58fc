//! Filtered pass-through of events to a standard stream.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::types::LogEvent;

/// Where console lines go.
#[derive(Debug, Clone, Default)]
pub enum ConsoleOutput {
    /// Process standard output.
    #[default]
    Stdout,
    /// Process standard error.
    Stderr,
    /// An in-memory capture, one entry per line.
    Memory(Arc<Mutex<Vec<String>>>),
}

impl ConsoleOutput {
    /// Creates an in-memory output and returns it with its shared buffer.
    #[must_use]
    pub fn memory() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (Self::Memory(Arc::clone(&lines)), lines)
    }

    /// Writes one line. Stream errors are ignored: a closed stdout must not
    /// take the host down.
    pub fn write_line(&self, line: &str) {
        match self {
            Self::Stdout => {
                let _ = writeln!(std::io::stdout().lock(), "{line}");
            }
            Self::Stderr => {
                let _ = writeln!(std::io::stderr().lock(), "{line}");
            }
            Self::Memory(lines) => lines.lock().push(line.to_string()),
        }
    }
}

/// Stream selector used in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
}

impl From<ConsoleStream> for ConsoleOutput {
    fn from(stream: ConsoleStream) -> Self {
        match stream {
            ConsoleStream::Stdout => Self::Stdout,
            ConsoleStream::Stderr => Self::Stderr,
        }
    }
}

/// A console sink with its own filter.
///
/// A synchronous console prints on the calling thread. An asynchronous one
/// hands the line to its node's queue, so it keeps order with that node's
/// other background work but not with the caller.
#[derive(Debug, Clone)]
pub struct Console {
    asynchronous: bool,
    filter: Filter,
    output: ConsoleOutput,
}

impl Default for Console {
    /// Synchronous, default filter, standard output.
    fn default() -> Self {
        Self::new(false, Filter::default())
    }
}

impl Console {
    /// Creates a console printing to standard output.
    #[must_use]
    pub fn new(asynchronous: bool, filter: Filter) -> Self {
        Self {
            asynchronous,
            filter,
            output: ConsoleOutput::Stdout,
        }
    }

    /// Redirects the console.
    #[must_use]
    pub fn with_output(mut self, output: ConsoleOutput) -> Self {
        self.output = output;
        self
    }

    /// True when printing is deferred to the node queue.
    #[must_use]
    pub const fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Returns the console's own filter.
    #[must_use]
    pub const fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Returns the formatted line if this console wants the event.
    #[must_use]
    pub fn render(&self, event: &LogEvent) -> Option<String> {
        self.filter
            .is_satisfied_by(event)
            .then(|| event.to_line())
    }

    /// Writes an already rendered line.
    pub fn print(&self, line: &str) {
        self.output.write_line(line);
    }
}
