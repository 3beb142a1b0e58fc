//! Declarative chain configuration.
//!
//! A [`ChainConfig`] describes every node of a chain plus the active source
//! mask and sampler timing. It loads from JSON and turns into live nodes with
//! [`ChainConfig::build`], or into an installed chain with
//! [`Dispatcher::apply_config`](crate::chain::Dispatcher::apply_config).
//!
//! ```json
//! {
//!   "active_sources": ["app", "cpu"],
//!   "monitor": { "interval_ms": 5000 },
//!   "nodes": [
//!     { "name": "main", "store": { "path": "logs/main.log" } },
//!     {
//!       "name": "errors",
//!       "store": { "path": "logs/errors.log", "trim_policy": "line_aligned" },
//!       "filter": { "has_any_level": ["fault", "error"] },
//!       "console": null
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::console::{Console, ConsoleStream};
use crate::error::{LogError, Result};
use crate::file_store::{TextDriver, TextDriverConfig};
use crate::filter::Filter;
use crate::mailer::Mailer;
use crate::monitor::MonitorConfig;
use crate::node::LogNode;
use crate::types::SourceMask;

/// Serde adapter storing a [`Duration`](std::time::Duration) as whole milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// A whole chain: nodes in order, active sources and sampler timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Nodes in dispatch order.
    pub nodes: Vec<NodeConfig>,
    /// Sources to enable once the chain is installed.
    pub active_sources: SourceMask,
    /// Sampler timing.
    pub monitor: MonitorConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            active_sources: SourceMask::APP,
            monitor: MonitorConfig::default(),
        }
    }
}

impl ChainConfig {
    /// Loads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LogError::InvalidConfig(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks node names, store limits and the sampling interval.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(LogError::InvalidConfig("node name cannot be empty".to_string()));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(LogError::DuplicateNode(node.name.clone()));
            }
            node.store.validate()?;
        }
        self.monitor.validate()
    }

    /// Creates the configured nodes on the current tokio runtime.
    pub fn build(&self) -> Result<Vec<LogNode>> {
        self.validate()?;
        self.nodes.iter().map(NodeConfig::build).collect()
    }
}

/// One node of a [`ChainConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name.
    pub name: String,
    /// Backing text store.
    pub store: TextDriverConfig,
    /// Node filter. Accepts everything when omitted.
    #[serde(default)]
    pub filter: Filter,
    /// Console sink. A synchronous stdout console when omitted, none when `null`.
    #[serde(default = "default_console")]
    pub console: Option<ConsoleConfig>,
    /// Mail export descriptor.
    #[serde(default)]
    pub mailer: Option<Mailer>,
}

fn default_console() -> Option<ConsoleConfig> {
    Some(ConsoleConfig::default())
}

impl NodeConfig {
    /// Creates a node config with defaults for everything but name and store.
    #[must_use]
    pub fn new(name: impl Into<String>, store: TextDriverConfig) -> Self {
        Self {
            name: name.into(),
            store,
            filter: Filter::default(),
            console: default_console(),
            mailer: None,
        }
    }

    /// Creates the node on the current tokio runtime.
    pub fn build(&self) -> Result<LogNode> {
        let driver = TextDriver::new(self.store.clone())?;
        let mut builder = LogNode::builder(self.name.clone(), Arc::new(driver)).filter(self.filter.clone());
        builder = match &self.console {
            Some(console) => builder.console(console.build()),
            None => builder.without_console(),
        };
        if let Some(mailer) = &self.mailer {
            builder = builder.mailer(mailer.clone());
        }
        builder.build()
    }
}

/// Console settings of a [`NodeConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Print through the node queue instead of inline.
    pub asynchronous: bool,
    /// Console filter, independent of the node filter.
    pub filter: Filter,
    /// Target stream.
    pub stream: ConsoleStream,
}

impl ConsoleConfig {
    /// Creates the console.
    #[must_use]
    pub fn build(&self) -> Console {
        Console::new(self.asynchronous, self.filter.clone()).with_output(self.stream.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::file_store::TrimPolicy;
    use crate::types::{Level, LevelMask, LogEvent};

    fn sample(dir: &Path) -> String {
        let main = dir.join("main.log");
        let errors = dir.join("errors.log");
        format!(
            r#"{{
                "active_sources": ["app", "ram"],
                "monitor": {{ "interval_ms": 5000 }},
                "nodes": [
                    {{ "name": "main", "store": {{ "path": {main:?} }} }},
                    {{
                        "name": "errors",
                        "store": {{ "path": {errors:?}, "max_size": 4096, "margin_size": 512, "trim_policy": "line_aligned" }},
                        "filter": {{ "has_any_level": ["fault", "error"] }},
                        "console": null,
                        "mailer": {{ "subject": "Errors", "recipients": ["ops@example.com"] }}
                    }}
                ]
            }}"#
        )
    }

    #[test]
    fn parses_full_document() {
        let dir = TempDir::new().expect("tempdir");
        let config = ChainConfig::from_json_str(&sample(dir.path())).expect("parse");

        assert_eq!(config.active_sources, SourceMask::APP | SourceMask::RAM);
        assert_eq!(config.monitor.interval, Duration::from_secs(5));
        assert_eq!(config.nodes.len(), 2);

        let main = &config.nodes[0];
        assert_eq!(main.filter, Filter::default());
        assert_eq!(main.console, Some(ConsoleConfig::default()));
        assert_eq!(main.store.max_size, TextDriverConfig::default().max_size);

        let errors = &config.nodes[1];
        assert_eq!(errors.console, None);
        assert_eq!(errors.store.trim_policy, TrimPolicy::LineAligned);
        assert_eq!(errors.filter, Filter::HasAnyLevel(LevelMask::FAULT | LevelMask::ERROR));
        assert_eq!(
            errors.mailer.as_ref().map(|m| m.subject.as_str()),
            Some("Errors")
        );
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = ChainConfig::from_json_str("{}").expect("parse");
        assert_eq!(config, ChainConfig::default());
        assert_eq!(config.active_sources, SourceMask::APP);
    }

    #[test]
    fn rejects_duplicate_names() {
        let json = r#"{"nodes": [
            {"name": "a", "store": {"path": "a.log"}},
            {"name": "a", "store": {"path": "b.log"}}
        ]}"#;
        assert!(matches!(
            ChainConfig::from_json_str(json),
            Err(LogError::DuplicateNode(name)) if name == "a"
        ));
    }

    #[test]
    fn rejects_invalid_store_limits() {
        let json = r#"{"nodes": [
            {"name": "a", "store": {"path": "a.log", "max_size": 10, "margin_size": 10}}
        ]}"#;
        assert!(matches!(
            ChainConfig::from_json_str(json),
            Err(LogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_interval() {
        assert!(matches!(
            ChainConfig::from_json_str(r#"{"monitor": {"interval_ms": 0}}"#),
            Err(LogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        assert!(matches!(
            ChainConfig::from_json_str("{nodes"),
            Err(LogError::Serialization(_))
        ));
    }

    #[test]
    fn from_file_reads_and_reports_missing() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("klog.json");
        std::fs::write(&path, sample(dir.path())).expect("write");

        assert_eq!(ChainConfig::from_file(&path).expect("load").nodes.len(), 2);
        assert!(matches!(
            ChainConfig::from_file(dir.path().join("missing.json")),
            Err(LogError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn build_creates_working_nodes() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = ChainConfig::from_json_str(&sample(dir.path())).expect("parse");
        config.nodes[0].console = None;
        let nodes = config.build().expect("build");

        assert_eq!(nodes[0].name(), "main");
        assert!(nodes[1].console().is_none());
        assert!(nodes[1].mailer().is_some());

        let event = LogEvent::builder().level(Level::Error).message("configured").build();
        for node in &nodes {
            node.emit(&event);
            node.flush().await;
        }
        let stored = nodes[1].driver().read_all().expect("read");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message(), "configured");
    }
}
