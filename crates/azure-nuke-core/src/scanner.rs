//! Bounded-concurrency scanner
//!
//! [`Scanner::scan`] runs every requested resource-type handler for one
//! scope and streams what they find as [`Item`]s.
//!
//! Guarantees:
//! - At most `max_concurrency` handlers execute at once (one semaphore per scan).
//! - A type's handler starts only after every in-set dependency has finished
//!   emitting its items. Each type owns a completion latch that its
//!   dependents await before asking for a concurrency slot.
//! - A handler that panics, fails, or exceeds its deadline yields zero items
//!   and a failure entry in the [`ScanReport`]; sibling handlers are unaffected.
//! - The item stream terminates once every handler has completed.

use crate::error::{HandlerError, RegistryError};
use crate::queue::{Item, Queue};
use crate::registry::Registry;
use crate::resource::{Resource, ResourceHandler, ScopeContext};
use azure_nuke_common::defaults::{
    DEFAULT_HANDLER_TIMEOUT_SECS, DEFAULT_ITEM_CHANNEL_CAPACITY, DEFAULT_SCAN_CONCURRENCY,
};
use futures::{FutureExt, Stream};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

/// Scanner tuning
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Maximum handlers executing at once
    pub max_concurrency: usize,
    /// Deadline for one handler's `list` call
    pub handler_timeout: Duration,
    /// Buffered items between handlers and the consumer
    pub channel_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_SCAN_CONCURRENCY,
            handler_timeout: Duration::from_secs(DEFAULT_HANDLER_TIMEOUT_SECS),
            channel_capacity: DEFAULT_ITEM_CHANNEL_CAPACITY,
        }
    }
}

/// How one resource type's invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Handler returned this many resources
    Listed(usize),
    /// Handler reported the type does not apply to this scope
    Skipped(String),
    /// Handler returned a hard error
    Failed(String),
    /// Handler panicked
    Panicked(String),
    /// Handler exceeded its deadline
    TimedOut(Duration),
}

impl HandlerOutcome {
    /// True for hard failures, panics and timeouts
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            HandlerOutcome::Failed(_) | HandlerOutcome::Panicked(_) | HandlerOutcome::TimedOut(_)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Listed(_) => "listed",
            HandlerOutcome::Skipped(_) => "skipped",
            HandlerOutcome::Failed(_) => "failed",
            HandlerOutcome::Panicked(_) => "panicked",
            HandlerOutcome::TimedOut(_) => "timed-out",
        }
    }
}

/// Outcome of one resource type within a scan
#[derive(Debug, Clone)]
pub struct TypeReport {
    pub type_name: String,
    pub outcome: HandlerOutcome,
    /// Time spent holding a concurrency slot
    pub elapsed: Duration,
}

/// Per-type outcomes of one scan, in scan-list order
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub context: ScopeContext,
    pub types: Vec<TypeReport>,
}

impl ScanReport {
    /// Resources listed across all types
    pub fn listed(&self) -> usize {
        self.types
            .iter()
            .map(|t| match t.outcome {
                HandlerOutcome::Listed(n) => n,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TypeReport> {
        self.types.iter().filter(|t| t.outcome.is_failure())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TypeReport> {
        self.types
            .iter()
            .filter(|t| matches!(t.outcome, HandlerOutcome::Skipped(_)))
    }

    pub fn outcome(&self, type_name: &str) -> Option<&HandlerOutcome> {
        self.types
            .iter()
            .find(|t| t.type_name == type_name)
            .map(|t| &t.outcome)
    }
}

/// Stream of items from a running scan.
///
/// Ends after every handler completed. Call [`finish`](Self::finish) (or use
/// [`collect_into`](Self::collect_into)) to obtain the [`ScanReport`].
#[derive(Debug)]
pub struct ScanStream {
    items: ReceiverStream<Item>,
    report: JoinHandle<ScanReport>,
    context: ScopeContext,
}

impl ScanStream {
    /// Wait for all handlers and return their outcomes.
    ///
    /// Items not yet consumed are discarded.
    pub async fn finish(self) -> ScanReport {
        let ScanStream {
            items,
            report,
            context,
        } = self;
        drop(items);
        match report.await {
            Ok(report) => report,
            Err(e) => {
                error!(scope = %context, error = %e, "Scan driver task failed");
                ScanReport {
                    context,
                    types: Vec::new(),
                }
            }
        }
    }

    /// Drain the stream into `queue`, then return the report
    pub async fn collect_into(mut self, queue: &mut Queue) -> ScanReport {
        while let Some(item) = self.items.next().await {
            queue.push(item);
        }
        self.finish().await
    }
}

impl Stream for ScanStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        Pin::new(&mut self.items).poll_next(cx)
    }
}

/// Runs registered handlers for a scope under a concurrency limit
#[derive(Debug, Clone)]
pub struct Scanner {
    registry: Arc<Registry>,
    config: ScannerConfig,
}

/// Everything one per-type task needs
struct TypeJob {
    position: usize,
    type_name: String,
    handler: Arc<dyn ResourceHandler>,
    context: ScopeContext,
    dependencies: Vec<watch::Receiver<bool>>,
    done: watch::Sender<bool>,
    limiter: Arc<Semaphore>,
    items: mpsc::Sender<Item>,
    timeout: Duration,
}

impl Scanner {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            config: ScannerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Start scanning `context` for the given types.
    ///
    /// `ordered` must already be dependency-ordered (see
    /// [`Registry::resolve_order`]) and contain only types registered at the
    /// context's scope; violations are rejected before any handler runs.
    /// Must be called from within a Tokio runtime.
    pub fn scan<S: AsRef<str>>(
        &self,
        context: ScopeContext,
        ordered: &[S],
    ) -> Result<ScanStream, RegistryError> {
        let scope = context.scope();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut entries = Vec::with_capacity(ordered.len());
        for name in ordered {
            let name = name.as_ref();
            if !seen.insert(name) {
                continue;
            }
            let entry = self
                .registry
                .get(name)
                .ok_or_else(|| RegistryError::UnknownType(name.to_string()))?;
            if entry.scope() != scope {
                return Err(RegistryError::WrongScope {
                    name: name.to_string(),
                    registered: entry.scope(),
                    requested: scope,
                });
            }
            entries.push(entry);
        }

        // In-set dependencies, checked to precede their dependents so the
        // latches below can never wait on each other in a loop.
        let ordered_names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        let mut dependency_positions = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let mut deps = Vec::new();
            for dep in entry.depends_on() {
                match ordered_names.iter().position(|n| *n == dep.as_str()) {
                    Some(j) if j < i => deps.push(j),
                    Some(_) => {
                        return Err(RegistryError::NotOrdered {
                            name: entry.name().to_string(),
                            dependency: dep.clone(),
                        });
                    }
                    None => {}
                }
            }
            dependency_positions.push(deps);
        }

        let limiter = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (latches, finished): (Vec<watch::Sender<bool>>, Vec<watch::Receiver<bool>>) =
            entries.iter().map(|_| watch::channel(false)).unzip();

        let jobs: Vec<TypeJob> = entries
            .iter()
            .zip(dependency_positions)
            .zip(latches)
            .enumerate()
            .map(|(i, ((entry, deps), done))| TypeJob {
                position: i,
                type_name: entry.name().to_string(),
                handler: Arc::clone(entry.handler()),
                context: context.clone(),
                dependencies: deps.into_iter().map(|j| finished[j].clone()).collect(),
                done,
                limiter: Arc::clone(&limiter),
                items: tx.clone(),
                timeout: self.config.handler_timeout,
            })
            .collect();
        drop(tx);

        info!(
            scope = %context,
            types = jobs.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting scan"
        );

        let driver_context = context.clone();
        let report = tokio::spawn(async move {
            let total = jobs.len();
            let mut set = JoinSet::new();
            for job in jobs {
                set.spawn(run_type(job));
            }

            let mut reports: Vec<(usize, TypeReport)> = Vec::with_capacity(total);
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => error!(scope = %driver_context, error = %e, "Scan task aborted"),
                }
            }
            reports.sort_by_key(|(position, _)| *position);

            let report = ScanReport {
                context: driver_context,
                types: reports.into_iter().map(|(_, r)| r).collect(),
            };
            info!(
                scope = %report.context,
                listed = report.listed(),
                failed = report.failures().count(),
                skipped = report.skipped().count(),
                "Scan complete"
            );
            report
        });

        Ok(ScanStream {
            items: ReceiverStream::new(rx),
            report,
            context,
        })
    }
}

async fn run_type(job: TypeJob) -> (usize, TypeReport) {
    let TypeJob {
        position,
        type_name,
        handler,
        context,
        dependencies,
        done,
        limiter,
        items,
        timeout,
    } = job;

    for mut dependency in dependencies {
        // A dropped sender also means the dependency is over.
        let _ = dependency.wait_for(|finished| *finished).await;
    }

    let (outcome, elapsed) = match limiter.acquire_owned().await {
        Ok(_permit) => {
            let started = Instant::now();
            let outcome = match invoke(handler, &type_name, context.clone(), timeout).await {
                Ok(resources) => {
                    let count = resources.len();
                    emit(&items, resources, &type_name, &context).await;
                    HandlerOutcome::Listed(count)
                }
                Err(outcome) => outcome,
            };
            (outcome, started.elapsed())
        }
        Err(_) => (
            HandlerOutcome::Failed("concurrency limiter closed".to_string()),
            Duration::ZERO,
        ),
    };

    log_outcome(&type_name, &context, &outcome, elapsed);
    done.send_replace(true);

    (
        position,
        TypeReport {
            type_name,
            outcome,
            elapsed,
        },
    )
}

/// Where a handler panicked, recorded by the panic hook on the panicking thread
struct PanicSite {
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Chain a hook in front of the current one that remembers the panic site.
/// The previous hook still runs.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let site = PanicSite {
                location: info.location().map(ToString::to_string),
                backtrace: Backtrace::capture(),
            };
            let _ = LAST_PANIC.try_with(|slot| *slot.borrow_mut() = Some(site));
            previous(info);
        }));
    });
}

fn take_panic_site() -> Option<PanicSite> {
    LAST_PANIC.try_with(|slot| slot.borrow_mut().take()).ok().flatten()
}

/// Run one handler in its own task so a panic or deadline only affects it
async fn invoke(
    handler: Arc<dyn ResourceHandler>,
    type_name: &str,
    context: ScopeContext,
    timeout: Duration,
) -> Result<Vec<Box<dyn Resource>>, HandlerOutcome> {
    install_panic_hook();
    let type_name = type_name.to_string();
    let mut task = tokio::spawn(async move {
        AssertUnwindSafe(handler.list(&context))
            .catch_unwind()
            .await
            .map_err(|payload| {
                let message = panic_message(payload);
                let Some(site) = take_panic_site() else {
                    return message;
                };
                if site.backtrace.status() == BacktraceStatus::Captured {
                    error!(
                        resource_type = %type_name,
                        scope = %context,
                        backtrace = %site.backtrace,
                        "Handler panic backtrace"
                    );
                }
                match site.location {
                    Some(location) => format!("{message} (at {location})"),
                    None => message,
                }
            })
    });

    match tokio::time::timeout(timeout, &mut task).await {
        Err(_) => {
            task.abort();
            Err(HandlerOutcome::TimedOut(timeout))
        }
        Ok(Err(join)) if join.is_panic() => Err(HandlerOutcome::Panicked(panic_message(
            join.into_panic(),
        ))),
        Ok(Err(join)) => Err(HandlerOutcome::Failed(format!("handler task cancelled: {join}"))),
        Ok(Ok(Err(panic))) => Err(HandlerOutcome::Panicked(panic)),
        Ok(Ok(Ok(Err(HandlerError::Skipped { reason })))) => Err(HandlerOutcome::Skipped(reason)),
        Ok(Ok(Ok(Err(HandlerError::Failed(e))))) => {
            Err(HandlerOutcome::Failed(format!("{e:#}")))
        }
        Ok(Ok(Ok(Ok(resources)))) => Ok(resources),
    }
}

async fn emit(
    items: &mpsc::Sender<Item>,
    resources: Vec<Box<dyn Resource>>,
    type_name: &str,
    context: &ScopeContext,
) {
    for resource in resources {
        let item = Item::new(resource, type_name, context.clone());
        if items.send(item).await.is_err() {
            debug!(resource_type = %type_name, "Item consumer went away, dropping remaining items");
            return;
        }
    }
}

fn log_outcome(type_name: &str, context: &ScopeContext, outcome: &HandlerOutcome, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match outcome {
        HandlerOutcome::Listed(count) => {
            debug!(resource_type = %type_name, scope = %context, count, elapsed_ms, "Listed resources");
        }
        HandlerOutcome::Skipped(reason) => {
            debug!(resource_type = %type_name, scope = %context, reason = %reason, "Resource type skipped");
        }
        HandlerOutcome::Failed(message) => {
            error!(resource_type = %type_name, scope = %context, error = %message, elapsed_ms, "Resource handler failed");
        }
        HandlerOutcome::Panicked(message) => {
            error!(resource_type = %type_name, scope = %context, panic = %message, "Resource handler panicked");
        }
        HandlerOutcome::TimedOut(limit) => {
            error!(resource_type = %type_name, scope = %context, timeout = ?limit, "Resource handler timed out");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registration;
    use async_trait::async_trait;
    use azure_nuke_common::{ItemState, ResourceScope};

    struct Thing(String);

    #[async_trait]
    impl Resource for Thing {
        async fn remove(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn display_name(&self) -> String {
            self.0.clone()
        }
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        List(usize),
        Skip,
        Fail,
        Hang,
        Panic,
    }

    struct TestHandler(Behaviour);

    #[async_trait]
    impl ResourceHandler for TestHandler {
        async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
            match self.0 {
                Behaviour::List(n) => Ok((0..n)
                    .map(|i| Box::new(Thing(format!("thing-{i}"))) as Box<dyn Resource>)
                    .collect()),
                Behaviour::Skip => Err(HandlerError::skip("provider not registered")),
                Behaviour::Fail => Err(anyhow::anyhow!("HTTP 500").into()),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Behaviour::Panic => panic!("index out of range"),
            }
        }
    }

    fn ctx() -> ScopeContext {
        ScopeContext::resource_group("t", "s", "rg")
    }

    fn scanner(entries: &[(&str, Behaviour, &[&str])]) -> Scanner {
        let mut registry = Registry::new();
        for &(name, behaviour, deps) in entries {
            registry
                .register(
                    Registration::new(name, Arc::new(TestHandler(behaviour)))
                        .with_scope(ResourceScope::ResourceGroup)
                        .depends_on(deps.iter().copied()),
                )
                .unwrap();
        }
        Scanner::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_items_are_new_and_tagged() {
        let scanner = scanner(&[("Disk", Behaviour::List(3), &[])]);
        let mut queue = Queue::new();
        let report = scanner
            .scan(ctx(), &["Disk"])
            .unwrap()
            .collect_into(&mut queue)
            .await;

        assert_eq!(queue.len(), 3);
        for item in &queue {
            assert_eq!(item.state(), ItemState::New);
            assert_eq!(item.type_name(), "Disk");
            assert_eq!(item.context(), &ctx());
        }
        assert_eq!(report.outcome("Disk"), Some(&HandlerOutcome::Listed(3)));
    }

    #[tokio::test]
    async fn test_skip_and_failure_are_contained() {
        let scanner = scanner(&[
            ("Skipper", Behaviour::Skip, &[]),
            ("Breaker", Behaviour::Fail, &[]),
            ("Disk", Behaviour::List(2), &[]),
        ]);
        let mut queue = Queue::new();
        let report = scanner
            .scan(ctx(), &["Skipper", "Breaker", "Disk"])
            .unwrap()
            .collect_into(&mut queue)
            .await;

        assert_eq!(queue.len(), 2);
        assert!(matches!(report.outcome("Skipper"), Some(HandlerOutcome::Skipped(_))));
        assert!(matches!(
            report.outcome("Breaker"),
            Some(HandlerOutcome::Failed(msg)) if msg.contains("HTTP 500")
        ));
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.skipped().count(), 1);
    }

    #[tokio::test]
    async fn test_panic_reports_location() {
        let scanner = scanner(&[
            ("Exploding", Behaviour::Panic, &[]),
            ("Disk", Behaviour::List(1), &["Exploding"]),
        ]);
        let mut queue = Queue::new();
        let report = scanner
            .scan(ctx(), &["Exploding", "Disk"])
            .unwrap()
            .collect_into(&mut queue)
            .await;

        assert_eq!(queue.len(), 1);
        let Some(HandlerOutcome::Panicked(message)) = report.outcome("Exploding") else {
            panic!("expected a panic outcome, got {:?}", report.outcome("Exploding"));
        };
        assert!(message.starts_with("index out of range"), "{message}");
        assert!(message.contains("scanner.rs"), "{message}");
    }

    #[test]
    fn test_panic_site_is_taken_once() {
        install_panic_hook();
        let caught = std::panic::catch_unwind(|| panic!("boom"));
        assert!(caught.is_err());

        let site = take_panic_site().unwrap();
        assert!(site.location.unwrap().contains("scanner.rs"));
        assert!(take_panic_site().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_handler_times_out() {
        let scanner = scanner(&[
            ("Slow", Behaviour::Hang, &[]),
            ("Disk", Behaviour::List(1), &[]),
        ])
        .with_config(ScannerConfig {
            handler_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        let mut queue = Queue::new();
        let report = scanner
            .scan(ctx(), &["Slow", "Disk"])
            .unwrap()
            .collect_into(&mut queue)
            .await;

        assert_eq!(queue.len(), 1);
        assert_eq!(
            report.outcome("Slow"),
            Some(&HandlerOutcome::TimedOut(Duration::from_secs(5)))
        );
    }

    #[tokio::test]
    async fn test_rejects_dependency_after_dependent() {
        let scanner = scanner(&[
            ("VirtualMachine", Behaviour::List(1), &[]),
            ("Disk", Behaviour::List(1), &["VirtualMachine"]),
        ]);
        let err = scanner
            .scan(ctx(), &["Disk", "VirtualMachine"])
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotOrdered { .. }));
    }

    #[tokio::test]
    async fn test_rejects_wrong_scope() {
        let scanner = scanner(&[("Disk", Behaviour::List(1), &[])]);
        let err = scanner
            .scan(ScopeContext::subscription("t", "s"), &["Disk"])
            .unwrap_err();
        assert!(matches!(err, RegistryError::WrongScope { .. }));
    }

    #[tokio::test]
    async fn test_empty_scan_terminates() {
        let scanner = scanner(&[]);
        let names: [&str; 0] = [];
        let mut queue = Queue::new();
        let report = scanner
            .scan(ctx(), &names)
            .unwrap()
            .collect_into(&mut queue)
            .await;
        assert!(queue.is_empty());
        assert!(report.types.is_empty());
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }
}
