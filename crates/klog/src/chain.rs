//! Chains of log nodes and the root dispatcher.
//!
//! A [`LogChain`] is an ordered, immutable list of nodes. Every event visits
//! every node in order; each node's filter only gates that node's own sinks.
//!
//! A [`Dispatcher`] owns the installed chain, the active source mask and the
//! resource monitor. The process-wide instance is reached through
//! [`global`] and the free functions in this module.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::ChainConfig;
use crate::error::{LogError, Result};
use crate::monitor::{MonitorConfig, ResourceSampler, SystemMonitor, SystemSampler};
use crate::node::LogNode;
use crate::types::{Level, LogEvent, Priority, Source, SourceMask};

/// Receiver of fully formed events.
pub trait EventSink: Send + Sync {
    /// Routes one event.
    fn dispatch(&self, event: LogEvent);
}

/// An ordered list of uniquely named nodes.
#[derive(Debug)]
pub struct LogChain {
    nodes: Vec<Arc<LogNode>>,
}

impl LogChain {
    /// Builds a chain, keeping the given order.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::DuplicateNode`] if two nodes share a name.
    pub fn new(nodes: impl IntoIterator<Item = LogNode>) -> Result<Self> {
        let nodes: Vec<Arc<LogNode>> = nodes.into_iter().map(Arc::new).collect();
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.name()) {
                return Err(LogError::DuplicateNode(node.name().to_string()));
            }
        }
        Ok(Self { nodes })
    }

    /// Nodes in dispatch order.
    pub fn nodes(&self) -> &[Arc<LogNode>] {
        &self.nodes
    }

    /// Looks a node up by name.
    pub fn node(&self, name: &str) -> Option<&Arc<LogNode>> {
        self.nodes.iter().find(|node| node.name() == name)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the chain has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Offers the event to every node in order.
    pub fn dispatch(&self, event: &LogEvent) {
        for node in &self.nodes {
            node.emit(event);
        }
    }

    /// Waits for every node's queued work.
    pub async fn flush(&self) {
        join_all(self.nodes.iter().map(|node| node.flush())).await;
    }
}

struct Inner {
    chain: RwLock<Option<Arc<LogChain>>>,
    sources: RwLock<SourceMask>,
    monitor: Mutex<SystemMonitor>,
}

impl EventSink for Inner {
    fn dispatch(&self, event: LogEvent) {
        let chain = self.chain.read().clone();
        if let Some(chain) = chain {
            chain.dispatch(&event);
        }
    }
}

/// Root router: installed chain, active sources, resource monitor.
///
/// Cloning is cheap and yields a handle to the same state. Administrative
/// calls (`set_chain`, the source setters, `apply_config`) are meant to come
/// from one control thread; logging calls may come from anywhere.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("chain", &self.chain().map(|c| c.len()))
            .field("sources", &self.active_sources())
            .finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no chain, `App` active and the host sampler.
    pub fn new() -> Self {
        Self::with_sampler(Arc::new(SystemSampler::new()), MonitorConfig::default())
    }

    /// Creates a dispatcher sampling through `sampler`.
    pub fn with_sampler(sampler: Arc<dyn ResourceSampler>, config: MonitorConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let sink: Weak<dyn EventSink> = weak.clone();
            Inner {
                chain: RwLock::new(None),
                sources: RwLock::new(SourceMask::APP),
                monitor: Mutex::new(SystemMonitor::new(sink, sampler, config)),
            }
        });
        Self { inner }
    }

    /// Installs a chain built from `nodes`, replacing any previous one.
    ///
    /// Nodes of the old chain finish their queued work and stop once the
    /// last reference to them drops.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::DuplicateNode`] if two nodes share a name. The
    /// installed chain is left untouched.
    pub fn set_chain(&self, nodes: impl IntoIterator<Item = LogNode>) -> Result<()> {
        self.install(LogChain::new(nodes)?);
        Ok(())
    }

    /// Installs a prebuilt chain.
    pub fn install(&self, chain: LogChain) {
        debug!(nodes = chain.len(), "log chain installed");
        *self.inner.chain.write() = Some(Arc::new(chain));
    }

    /// Removes the chain. Later events are dropped.
    pub fn clear_chain(&self) {
        *self.inner.chain.write() = None;
        debug!("log chain cleared");
    }

    /// The installed chain, if any.
    pub fn chain(&self) -> Option<Arc<LogChain>> {
        self.inner.chain.read().clone()
    }

    /// Routes a prebuilt event. A no-op without a chain.
    pub fn dispatch(&self, event: LogEvent) {
        self.inner.dispatch(event);
    }

    /// Logs an application event.
    pub fn log(&self, level: Level, priority: Priority, origin: impl Into<String>, message: impl Into<String>) {
        self.dispatch(LogEvent::new(priority, Source::App, level, origin, message));
    }

    /// Logs a fault at its default priority.
    pub fn fault(&self, message: impl Into<String>, origin: impl Into<String>) {
        self.log(Level::Fault, Level::Fault.default_priority(), origin, message);
    }

    /// Logs an error at its default priority.
    pub fn error(&self, message: impl Into<String>, origin: impl Into<String>) {
        self.log(Level::Error, Level::Error.default_priority(), origin, message);
    }

    /// Logs a warning at its default priority.
    pub fn warn(&self, message: impl Into<String>, origin: impl Into<String>) {
        self.log(Level::Warn, Level::Warn.default_priority(), origin, message);
    }

    /// Logs an informational event at its default priority.
    pub fn info(&self, message: impl Into<String>, origin: impl Into<String>) {
        self.log(Level::Info, Level::Info.default_priority(), origin, message);
    }

    /// Logs a debug event at its default priority.
    pub fn debug(&self, message: impl Into<String>, origin: impl Into<String>) {
        self.log(Level::Debug, Level::Debug.default_priority(), origin, message);
    }

    /// Logs a util event at its default priority.
    pub fn util(&self, message: impl Into<String>, origin: impl Into<String>) {
        self.log(Level::Util, Level::Util.default_priority(), origin, message);
    }

    /// Emits a synthetic event from a non-application source, with lowest
    /// priority and no origin.
    pub fn emit_from(&self, source: Source, level: Level, message: impl Into<String>) {
        self.dispatch(LogEvent::new(Priority::LOWEST, source, level, "", message));
    }

    /// The active source mask.
    pub fn active_sources(&self) -> SourceMask {
        *self.inner.sources.read()
    }

    /// Replaces the active source mask and re-gates the monitor.
    pub fn set_active_sources(&self, sources: SourceMask) {
        *self.inner.sources.write() = sources;
        self.inner.monitor.lock().monitor(sources);
    }

    /// Adds sources to the active mask.
    pub fn add_active_sources(&self, sources: SourceMask) {
        self.set_active_sources(self.active_sources() | sources);
    }

    /// Removes sources from the active mask.
    pub fn remove_active_sources(&self, sources: SourceMask) {
        self.set_active_sources(self.active_sources() & !sources);
    }

    /// True while the resource monitor task runs.
    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor.lock().is_running()
    }

    /// Builds and installs a configured chain, then applies its sampler
    /// timing and active sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a node cannot be
    /// created. Nothing is changed in that case.
    pub fn apply_config(&self, config: &ChainConfig) -> Result<()> {
        self.set_chain(config.build()?)?;
        self.inner.monitor.lock().reconfigure(config.monitor);
        self.set_active_sources(config.active_sources);
        Ok(())
    }

    /// Waits for every node of the installed chain to drain.
    pub async fn flush(&self) {
        if let Some(chain) = self.chain() {
            chain.flush().await;
        }
    }
}

static GLOBAL: Lazy<Dispatcher> = Lazy::new(Dispatcher::new);

/// The process-wide dispatcher used by the logging macros.
pub fn global() -> &'static Dispatcher {
    &GLOBAL
}

/// Installs the process-wide chain.
///
/// # Errors
///
/// Returns [`LogError::DuplicateNode`] if two nodes share a name.
pub fn set_chain(nodes: impl IntoIterator<Item = LogNode>) -> Result<()> {
    global().set_chain(nodes)
}

/// Replaces the process-wide active source mask.
pub fn set_active_sources(sources: SourceMask) {
    global().set_active_sources(sources);
}

/// Adds to the process-wide active source mask.
pub fn add_active_sources(sources: SourceMask) {
    global().add_active_sources(sources);
}

/// Removes from the process-wide active source mask.
pub fn remove_active_sources(sources: SourceMask) {
    global().remove_active_sources(sources);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::config::NodeConfig;
    use crate::file_store::TextDriverConfig;
    use crate::filter::Filter;
    use crate::monitor::{CpuUsage, ProcessMemory, SystemMemory};
    use crate::traits::Driver;
    use crate::traits::tests::MemoryDriver;

    struct IdleSampler;

    impl ResourceSampler for IdleSampler {
        fn sample_cpu(&self) -> Result<CpuUsage> {
            Ok(CpuUsage {
                idle: 100.0,
                ..CpuUsage::default()
            })
        }

        fn sample_process_memory(&self) -> Result<ProcessMemory> {
            Ok(ProcessMemory::default())
        }

        fn sample_system_memory(&self) -> Result<SystemMemory> {
            Ok(SystemMemory::default())
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::with_sampler(Arc::new(IdleSampler), MonitorConfig::default())
    }

    fn node(name: &str, driver: &Arc<MemoryDriver>, filter: Filter) -> LogNode {
        LogNode::builder(name, Arc::clone(driver) as Arc<dyn Driver>)
            .filter(filter)
            .without_console()
            .build()
            .expect("build node")
    }

    #[tokio::test]
    async fn event_reaches_every_node_past_a_rejecting_one() {
        let first = Arc::new(MemoryDriver::new("first"));
        let second = Arc::new(MemoryDriver::new("second"));
        let third = Arc::new(MemoryDriver::new("third"));
        let dispatcher = dispatcher();
        dispatcher
            .set_chain([
                node("first", &first, Filter::Always),
                node("second", &second, Filter::Never),
                node("third", &third, Filter::Always),
            ])
            .expect("install");

        dispatcher.info("through", "main.rs.1 app");
        dispatcher.flush().await;

        assert_eq!(first.messages(), vec!["through"]);
        assert!(second.messages().is_empty());
        assert_eq!(third.messages(), vec!["through"]);

        let chain = dispatcher.chain().expect("chain");
        assert_eq!(chain.node("second").map(|n| n.stats().received()), Some(1));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let driver = Arc::new(MemoryDriver::new("dup"));
        let dispatcher = dispatcher();

        let result = dispatcher.set_chain([
            node("dup", &driver, Filter::Always),
            node("dup", &driver, Filter::Always),
        ]);

        assert!(matches!(result, Err(LogError::DuplicateNode(name)) if name == "dup"));
        assert!(dispatcher.chain().is_none());
    }

    #[tokio::test]
    async fn no_chain_drops_silently() {
        let dispatcher = dispatcher();
        dispatcher.error("nowhere", "");
        dispatcher.flush().await;
        assert!(dispatcher.chain().is_none());
    }

    #[tokio::test]
    async fn replacing_chain_redirects_events() {
        let old = Arc::new(MemoryDriver::new("old"));
        let new = Arc::new(MemoryDriver::new("new"));
        let dispatcher = dispatcher();

        dispatcher.set_chain([node("log", &old, Filter::Always)]).expect("install");
        dispatcher.warn("first", "");
        let previous = dispatcher.chain().expect("chain");
        dispatcher.set_chain([node("log", &new, Filter::Always)]).expect("install");
        dispatcher.warn("second", "");

        previous.flush().await;
        dispatcher.flush().await;

        assert_eq!(old.messages(), vec!["first"]);
        assert_eq!(new.messages(), vec!["second"]);
    }

    #[tokio::test]
    async fn clear_chain_stops_delivery() {
        let driver = Arc::new(MemoryDriver::new("log"));
        let dispatcher = dispatcher();
        dispatcher.set_chain([node("log", &driver, Filter::Always)]).expect("install");
        let chain = dispatcher.chain().expect("chain");

        dispatcher.clear_chain();
        dispatcher.info("dropped", "");
        chain.flush().await;

        assert!(driver.messages().is_empty());
    }

    #[tokio::test]
    async fn level_helpers_use_default_priorities() {
        let driver = Arc::new(MemoryDriver::new("all"));
        let dispatcher = dispatcher();
        dispatcher.set_chain([node("all", &driver, Filter::Always)]).expect("install");

        dispatcher.fault("f", "o");
        dispatcher.error("e", "o");
        dispatcher.warn("w", "o");
        dispatcher.info("i", "o");
        dispatcher.debug("d", "o");
        dispatcher.util("u", "o");
        dispatcher.log(Level::Info, Priority::HIGHEST, "o", "custom");
        dispatcher.flush().await;

        let events = driver.read_all().expect("read");
        let priorities: Vec<Priority> = events.iter().map(LogEvent::priority).collect();
        assert_eq!(
            priorities,
            vec![
                Priority::HIGHEST,
                Priority::HIGHER,
                Priority::HIGH,
                Priority::LOW,
                Priority::LOWER,
                Priority::LOWEST,
                Priority::HIGHEST,
            ]
        );
        assert!(events.iter().all(|e| e.source() == Source::App && e.origin() == "o"));
    }

    #[tokio::test]
    async fn emit_from_tags_source() {
        let driver = Arc::new(MemoryDriver::new("sys"));
        let dispatcher = dispatcher();
        dispatcher
            .set_chain([node("sys", &driver, Filter::HasAnySource(SourceMask::RAM))])
            .expect("install");

        dispatcher.emit_from(Source::Ram, Level::Util, "resident: 1.00 MB");
        dispatcher.info("app event", "");
        dispatcher.flush().await;

        let events = driver.read_all().expect("read");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source(), Source::Ram);
        assert_eq!(events[0].priority(), Priority::LOWEST);
        assert!(events[0].origin().is_empty());
    }

    #[tokio::test]
    async fn source_setters_gate_monitor() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.active_sources(), SourceMask::APP);
        assert!(!dispatcher.is_monitoring());

        dispatcher.add_active_sources(SourceMask::CPU);
        assert_eq!(dispatcher.active_sources(), SourceMask::APP | SourceMask::CPU);
        assert!(dispatcher.is_monitoring());

        dispatcher.remove_active_sources(SourceMask::CPU);
        assert_eq!(dispatcher.active_sources(), SourceMask::APP);
        assert!(!dispatcher.is_monitoring());

        dispatcher.set_active_sources(SourceMask::RAM);
        assert!(dispatcher.is_monitoring());
        dispatcher.set_active_sources(SourceMask::NONE);
        assert!(!dispatcher.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_events_flow_through_chain() {
        let driver = Arc::new(MemoryDriver::new("cpu"));
        let dispatcher = dispatcher();
        dispatcher
            .set_chain([node("cpu", &driver, Filter::HasAnySource(SourceMask::CPU))])
            .expect("install");

        dispatcher.set_active_sources(SourceMask::APP | SourceMask::CPU);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        dispatcher.set_active_sources(SourceMask::APP);
        dispatcher.flush().await;

        let events = driver.read_all().expect("read");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.level() == Level::Util));
        assert_eq!(
            events[0].message(),
            "user: 0.00%, system: 0.00%, idle: 100.00%, nice: 0.00%"
        );
    }

    #[tokio::test]
    async fn apply_config_installs_everything() {
        let dir = TempDir::new().expect("tempdir");
        let config = ChainConfig {
            nodes: vec![
                NodeConfig::new("main", TextDriverConfig::new(dir.path().join("main.log"))),
                NodeConfig::new("debug", TextDriverConfig::new(dir.path().join("debug.log"))),
            ],
            active_sources: SourceMask::APP | SourceMask::RAM,
            monitor: MonitorConfig::default().with_interval(Duration::from_secs(60)),
        };
        let dispatcher = dispatcher();

        dispatcher.apply_config(&config).expect("apply");

        assert_eq!(dispatcher.chain().map(|c| c.len()), Some(2));
        assert_eq!(dispatcher.active_sources(), SourceMask::APP | SourceMask::RAM);
        assert!(dispatcher.is_monitoring());

        dispatcher.set_active_sources(SourceMask::APP);
    }

    #[tokio::test]
    async fn apply_config_rejects_duplicates_without_changes() {
        let dir = TempDir::new().expect("tempdir");
        let store = TextDriverConfig::new(dir.path().join("x.log"));
        let config = ChainConfig {
            nodes: vec![NodeConfig::new("x", store.clone()), NodeConfig::new("x", store)],
            ..ChainConfig::default()
        };
        let dispatcher = dispatcher();

        assert!(dispatcher.apply_config(&config).is_err());
        assert!(dispatcher.chain().is_none());
    }
}
