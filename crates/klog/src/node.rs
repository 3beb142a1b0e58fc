//! Log nodes: one filter, one store, one serial work queue.
//!
//! A [`LogNode`] never blocks its caller on I/O. Accepted events are cloned
//! into an unbounded queue drained by a single tokio task, which runs each
//! store operation on the blocking pool and awaits it before taking the next
//! job. One task per node means one writer per store, in submission order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::console::Console;
use crate::error::{LogError, Result};
use crate::filter::Filter;
use crate::mailer::{ExportOutcome, MailComposer, MailDraft, Mailer};
use crate::traits::Driver;
use crate::types::LogEvent;

enum Job {
    Write(LogEvent),
    Print(String),
    Clear,
    Remove,
    Flush(oneshot::Sender<()>),
}

/// Running counters for one node.
#[derive(Debug, Default)]
pub struct NodeStats {
    received: AtomicU64,
    accepted: AtomicU64,
}

impl NodeStats {
    /// Events handed to the node.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Events that passed the node's filter.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

/// A filtered sink in a [`LogChain`](crate::chain::LogChain).
pub struct LogNode {
    name: String,
    driver: Arc<dyn Driver>,
    filter: Filter,
    console: Option<Console>,
    mailer: Option<Mailer>,
    jobs: mpsc::UnboundedSender<Job>,
    stats: NodeStats,
}

impl std::fmt::Debug for LogNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogNode")
            .field("name", &self.name)
            .field("path", &self.driver.path())
            .field("filter", &self.filter)
            .field("console", &self.console)
            .field("mailer", &self.mailer)
            .finish_non_exhaustive()
    }
}

impl LogNode {
    /// Starts building a node that persists through `driver`.
    #[must_use]
    pub fn builder(name: impl Into<String>, driver: Arc<dyn Driver>) -> LogNodeBuilder {
        LogNodeBuilder {
            name: name.into(),
            driver,
            filter: Filter::default(),
            console: Some(Console::default()),
            mailer: None,
            runtime: None,
        }
    }

    /// Node name, unique within a chain.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's filter.
    pub const fn filter(&self) -> &Filter {
        &self.filter
    }

    /// The backing store.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// The console sink, if any.
    pub const fn console(&self) -> Option<&Console> {
        self.console.as_ref()
    }

    /// The mail export descriptor, if any.
    pub const fn mailer(&self) -> Option<&Mailer> {
        self.mailer.as_ref()
    }

    /// Running counters.
    pub const fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Offers an event to this node.
    ///
    /// Events failing the filter are only counted. Accepted events go to the
    /// console and are queued for the store.
    pub fn emit(&self, event: &LogEvent) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        if !self.filter.is_satisfied_by(event) {
            return;
        }
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        if let Some(console) = &self.console {
            if let Some(line) = console.render(event) {
                if console.is_asynchronous() {
                    self.enqueue(Job::Print(line));
                } else {
                    console.print(&line);
                }
            }
        }

        self.enqueue(Job::Write(event.clone()));
    }

    /// Queues truncation of the store.
    pub fn clear(&self) {
        self.enqueue(Job::Clear);
    }

    /// Queues deletion of the store's file.
    pub fn remove(&self) {
        self.enqueue(Job::Remove);
    }

    /// Waits until every job queued before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.jobs.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Hands the stored log to a mail composer.
    ///
    /// Reads the store as it is now. Call [`flush`](Self::flush) first to
    /// include queued writes.
    pub fn export_via_mail<C: MailComposer>(
        &self,
        composer: &C,
        presenter: Option<&C::Presenter>,
    ) -> ExportOutcome {
        if !composer.can_send_mail() {
            return ExportOutcome::MailUnavailable;
        }
        let Some(presenter) = presenter else {
            return ExportOutcome::NoPresenter;
        };
        let Some(mailer) = &self.mailer else {
            return ExportOutcome::NoMailer;
        };
        let attachment = match self.driver.read_raw() {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(node = %self.name, path = %self.driver.path().display(), %error, "cannot read log for export");
                return ExportOutcome::Unreadable;
            }
        };

        composer.present(
            presenter,
            MailDraft {
                subject: mailer.subject.clone(),
                body: mailer.body.clone(),
                recipients: mailer.recipients.clone(),
                attachment,
                attachment_name: self.driver.file_name(),
                media_type: self.driver.media_type().to_string(),
            },
        );
        ExportOutcome::Presented
    }

    fn enqueue(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            debug!(node = %self.name, "log node queue closed, dropping job");
        }
    }
}

/// Builder for [`LogNode`].
#[must_use]
pub struct LogNodeBuilder {
    name: String,
    driver: Arc<dyn Driver>,
    filter: Filter,
    console: Option<Console>,
    mailer: Option<Mailer>,
    runtime: Option<Handle>,
}

impl LogNodeBuilder {
    /// Sets the filter. Defaults to accepting everything.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Replaces the default synchronous console.
    pub fn console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    /// Disables console output.
    pub fn without_console(mut self) -> Self {
        self.console = None;
        self
    }

    /// Attaches a mail export descriptor.
    pub fn mailer(mut self, mailer: Mailer) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Runs the node queue on `handle` instead of the current runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Spawns the node queue and returns the node.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::RuntimeUnavailable`] when no runtime handle was
    /// given and the caller is outside a tokio runtime.
    pub fn build(self) -> Result<LogNode> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| LogError::RuntimeUnavailable)?,
        };

        let (jobs, queue) = mpsc::unbounded_channel();
        let console = self.console.clone();
        runtime.spawn(drain(self.name.clone(), Arc::clone(&self.driver), console, queue));

        debug!(node = %self.name, path = %self.driver.path().display(), "log node started");
        Ok(LogNode {
            name: self.name,
            driver: self.driver,
            filter: self.filter,
            console: self.console,
            mailer: self.mailer,
            jobs,
            stats: NodeStats::default(),
        })
    }
}

async fn drain(
    node: String,
    driver: Arc<dyn Driver>,
    console: Option<Console>,
    mut queue: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = queue.recv().await {
        match job {
            Job::Write(event) => {
                run_blocking(&node, &driver, "append", move |d| d.append(&event)).await;
            }
            Job::Print(line) => {
                if let Some(console) = &console {
                    console.print(&line);
                }
            }
            Job::Clear => run_blocking(&node, &driver, "clear", |d| d.clear()).await,
            Job::Remove => run_blocking(&node, &driver, "remove", |d| d.remove()).await,
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(node = %node, "log node queue closed");
}

async fn run_blocking<F>(node: &str, driver: &Arc<dyn Driver>, operation: &'static str, act: F)
where
    F: FnOnce(&dyn Driver) -> Result<()> + Send + 'static,
{
    let target = Arc::clone(driver);
    match tokio::task::spawn_blocking(move || act(target.as_ref())).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(node, path = %driver.path().display(), operation, %error, "log store operation failed");
        }
        Err(error) => {
            warn!(node, path = %driver.path().display(), operation, %error, "log store task aborted");
        }
    }
}
