//! Discovery, filtering and removal for one tenant
//!
//! A run resolves the tenant once, scans every scope innermost first
//! (resource groups, then subscriptions, then the tenant) so contained
//! resources are queued before their containers, filters the queue, and,
//! unless dry-run is set, removes what is left in queue order.

use crate::config::RunConfig;
use crate::error::{RegistryError, TenantError};
use crate::queue::{Item, Queue, QueueSummary};
use crate::registry::Registry;
use crate::resource::Properties;
use crate::scanner::{HandlerOutcome, ScanReport, Scanner, TypeReport};
use crate::tenant::{ManagementOperations, ScopeEnumerator, TenantSnapshot};
use anyhow::{Context, Result};
use azure_nuke_common::{ItemState, ResourceScope};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Policy deciding whether an item may be removed.
///
/// Returning `Some(reason)` marks the item filtered.
pub trait ItemFilter: Send + Sync {
    fn check(&self, item: &Item) -> Option<String>;
}

/// Filter that rejects nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ItemFilter for AcceptAll {
    fn check(&self, _item: &Item) -> Option<String> {
        None
    }
}

impl<F> ItemFilter for F
where
    F: Fn(&Item) -> Option<String> + Send + Sync,
{
    fn check(&self, item: &Item) -> Option<String> {
        self(item)
    }
}

/// Everything found across all scopes
#[derive(Debug, Default)]
pub struct Discovery {
    pub queue: Queue,
    pub reports: Vec<ScanReport>,
}

impl Discovery {
    /// Per-type failures across every scan
    pub fn failures(&self) -> impl Iterator<Item = (&ScanReport, &TypeReport)> {
        self.reports
            .iter()
            .flat_map(|r| r.failures().map(move |t| (r, t)))
    }
}

/// Result of the removal phase
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: usize,
    pub failed: usize,
    /// `(item, reason)` for every failed removal
    pub failures: Vec<(String, String)>,
}

impl fmt::Display for RemovalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} removed, {} failed", self.removed, self.failed)
    }
}

/// What a whole run did
#[derive(Debug)]
pub struct RunReport {
    pub snapshot: TenantSnapshot,
    pub summary: QueueSummary,
    pub scan_failures: usize,
    /// `None` in dry-run mode
    pub removal: Option<RemovalReport>,
}

/// Drives one run against a registry
pub struct Runner {
    registry: Arc<Registry>,
    scanner: Scanner,
    config: RunConfig,
    filter: Box<dyn ItemFilter>,
}

impl Runner {
    pub fn new(registry: Arc<Registry>, config: RunConfig) -> Self {
        let scanner = Scanner::new(Arc::clone(&registry)).with_config(config.scanner_config());
        Self {
            registry,
            scanner,
            config,
            filter: Box::new(AcceptAll),
        }
    }

    pub fn with_filter(mut self, filter: impl ItemFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Types to scan at `scope`, dependency-ordered.
    ///
    /// Names in the allow list must be registered.
    pub fn selected_types(&self, scope: ResourceScope) -> Result<Vec<String>, RegistryError> {
        if let Some(unknown) = self
            .config
            .flags
            .resource_types
            .iter()
            .chain(&self.config.flags.exclude_types)
            .find(|t| !self.registry.contains(t))
        {
            return Err(RegistryError::UnknownType(unknown.clone()));
        }

        let names: Vec<String> = self
            .registry
            .list_names(scope)
            .into_iter()
            .filter(|n| self.config.selects_type(n))
            .collect();
        self.registry.resolve_order(&names, scope)
    }

    /// Resolve the tenant hierarchy through `ops`
    pub async fn resolve<M: ManagementOperations>(
        &self,
        ops: M,
    ) -> Result<TenantSnapshot, TenantError> {
        ScopeEnumerator::new(ops)
            .with_timeout(self.config.scan.enumeration_timeout)
            .resolve_tenant(
                &self.config.tenant.tenant_id,
                &self.config.tenant.subscriptions,
                &self.config.tenant.regions,
            )
            .await
    }

    /// Scan every context of every scope, innermost scope first
    pub async fn discover(&self, snapshot: &TenantSnapshot) -> Result<Discovery, RegistryError> {
        let mut discovery = Discovery::default();
        for scope in ResourceScope::INNERMOST_FIRST {
            let types = self.selected_types(scope)?;
            if types.is_empty() {
                continue;
            }

            for context in snapshot.contexts(scope) {
                let started = Instant::now();
                let before = discovery.queue.len();
                let report = self
                    .scanner
                    .scan(context, &types)?
                    .collect_into(&mut discovery.queue)
                    .await;
                info!(
                    scope = %report.context,
                    count = discovery.queue.len() - before,
                    failures = report.failures().count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scanned scope"
                );
                discovery.reports.push(report);
            }
        }
        Ok(discovery)
    }

    /// Mark items filtered by their own veto or by the configured filter.
    ///
    /// Returns the number of items filtered by this call.
    pub fn apply_filters(&self, queue: &mut Queue) -> usize {
        let mut filtered = 0;
        for item in queue.iter_mut().filter(|i| i.state() == ItemState::New) {
            let reason = item
                .resource()
                .filter()
                .or_else(|| self.filter.check(item));
            if let Some(reason) = reason {
                advance(item, ItemState::Filtered, Some(reason));
                filtered += 1;
            }
        }
        filtered
    }

    /// Remove every unfiltered item, one at a time, in queue order
    pub async fn remove(&self, queue: &mut Queue) -> RemovalReport {
        let mut report = RemovalReport::default();
        for item in queue.iter_mut().filter(|i| i.state() == ItemState::New) {
            advance(item, ItemState::Pending, None);
            info!(
                resource_type = item.type_name(),
                name = %item.display_name(),
                scope = %item.context(),
                "Removing resource"
            );

            let result = item.resource().remove().await;
            match result {
                Ok(()) => {
                    advance(item, ItemState::Waiting, None);
                    advance(item, ItemState::Finished, None);
                    report.removed += 1;
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    error!(
                        resource_type = item.type_name(),
                        name = %item.display_name(),
                        error = %reason,
                        "Removal failed"
                    );
                    report.failures.push((item.display_name(), reason.clone()));
                    advance(item, ItemState::Failed, Some(reason));
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Resolve, discover, filter, print the summary and, unless dry-run,
    /// remove.
    pub async fn run<M: ManagementOperations>(&self, ops: M) -> Result<RunReport> {
        self.config.validate()?;

        let snapshot = self
            .resolve(ops)
            .await
            .context("Failed to resolve tenant hierarchy")?;
        let mut discovery = self
            .discover(&snapshot)
            .await
            .context("Failed to scan resources")?;

        let filtered = self.apply_filters(&mut discovery.queue);
        info!(
            total = discovery.queue.len(),
            filtered,
            "Discovery complete"
        );

        println!("{}", summary_table(&discovery.queue));
        if let Some(table) = failures_table(&discovery.reports) {
            println!("\nResource types that could not be listed:\n{table}");
        }
        let summary = discovery.queue.summary();
        println!("\n{summary}");

        let scan_failures = discovery.failures().count();
        if scan_failures > 0 {
            warn!(scan_failures, "Some resource types failed to list");
        }

        let removal = if self.config.dry_run() {
            info!("Dry run, nothing removed");
            None
        } else {
            let report = self.remove(&mut discovery.queue).await;
            println!("{report}");
            Some(report)
        };

        Ok(RunReport {
            snapshot,
            summary,
            scan_failures,
            removal,
        })
    }
}

/// Apply a transition the caller has already checked, logging if it is refused
fn advance(item: &mut Item, next: ItemState, reason: Option<String>) {
    if let Err(e) = item.transition(next, reason) {
        error!(name = %item.display_name(), error = %e, "Refused item transition");
    }
}

/// One row per queued item
pub fn summary_table(queue: &Queue) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Scope"),
            Cell::new("Type"),
            Cell::new("Name"),
            Cell::new("Properties"),
            Cell::new("State"),
            Cell::new("Reason"),
        ]);

    for item in queue {
        table.add_row(vec![
            Cell::new(item.context()),
            Cell::new(item.type_name()),
            Cell::new(item.display_name()),
            Cell::new(describe(&item.properties())),
            Cell::new(item.state()),
            Cell::new(item.reason().unwrap_or("-")),
        ]);
    }
    table
}

/// `key=value` pairs, one per line. The name already has its own column.
fn describe(properties: &Properties) -> String {
    let lines: Vec<String> = properties
        .iter()
        .filter(|(key, _)| key.as_str() != "Name")
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    if lines.is_empty() {
        "-".to_string()
    } else {
        lines.join("\n")
    }
}

/// One row per failed type per scope, or `None` if nothing failed
pub fn failures_table(reports: &[ScanReport]) -> Option<Table> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Scope"),
            Cell::new("Type"),
            Cell::new("Outcome"),
            Cell::new("Detail"),
        ]);

    let mut rows = 0;
    for report in reports {
        for failure in report.failures() {
            let detail = match &failure.outcome {
                HandlerOutcome::Failed(msg) | HandlerOutcome::Panicked(msg) => msg.clone(),
                HandlerOutcome::TimedOut(after) => format!("no result after {after:?}"),
                _ => String::new(),
            };
            table.add_row(vec![
                Cell::new(&report.context),
                Cell::new(&failure.type_name),
                Cell::new(failure.outcome.as_str()),
                Cell::new(detail),
            ]);
            rows += 1;
        }
    }
    (rows > 0).then_some(table)
}
