//! # klog
//!
//! Chained, filterable logging with size-capped file persistence.
//!
//! This crate provides:
//!
//! - [`LogEvent`]: An immutable record with priority, level, source and origin
//! - [`Filter`]: Composable predicates deciding what a node keeps
//! - [`LogNode`]: A filter, a store and an optional console behind a serial queue
//! - [`LogChain`] / [`Dispatcher`]: Ordered routing of every event through every node
//! - [`TextDriver`]: A line store that trims its oldest bytes at a size cap
//! - [`SystemMonitor`]: Periodic CPU and memory events gated by active sources
//! - [`ChainConfig`]: JSON configuration for a whole chain
//!
//! Every event visits every node of the installed chain in order. A node's
//! filter only decides whether that node prints and stores the event.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use klog::{Filter, LevelMask, LogNode, TextDriver};
//!
//! # async fn run() -> klog::Result<()> {
//! let everything = LogNode::builder("main", Arc::new(TextDriver::with_path("logs/main.log")?))
//!     .build()?;
//! let errors = LogNode::builder("errors", Arc::new(TextDriver::with_path("logs/errors.log")?))
//!     .filter(Filter::HasAnyLevel(LevelMask::FAULT | LevelMask::ERROR))
//!     .without_console()
//!     .build()?;
//! klog::set_chain([everything, errors])?;
//!
//! klog::info!("service started on port {}", 8080);
//! klog::error!("lost connection to {}", "db-1");
//! klog::global().flush().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod config;
pub mod console;
pub mod error;
pub mod file_store;
pub mod filter;
mod macros;
pub mod mailer;
pub mod monitor;
pub mod node;
pub mod traits;
pub mod types;

// Re-export main types
pub use chain::{
    add_active_sources, global, remove_active_sources, set_active_sources, set_chain,
    Dispatcher, EventSink, LogChain,
};
pub use config::{ChainConfig, ConsoleConfig, NodeConfig};
pub use console::{Console, ConsoleOutput, ConsoleStream};
pub use error::{LogError, Result};
pub use file_store::{TextDriver, TextDriverConfig, TrimPolicy};
pub use filter::Filter;
pub use mailer::{ExportOutcome, MailComposer, MailDraft, Mailer};
pub use monitor::{
    CpuTicks, CpuUsage, MonitorConfig, ProcessMemory, ResourceSampler, SystemMemory,
    SystemMonitor, SystemSampler,
};
pub use node::{LogNode, LogNodeBuilder, NodeStats};
pub use traits::Driver;
pub use types::{
    format_origin, Level, LevelMask, LogEvent, LogEventBuilder, Priority, Source, SourceMask,
};
