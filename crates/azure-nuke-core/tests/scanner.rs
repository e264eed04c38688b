//! Scanner concurrency, ordering and fault isolation

use azure_nuke_core::{
    HandlerOutcome, ItemState, Queue, Registration, Registry, ResourceHandler, ResourceScope,
    ScannerConfig, Scanner, ScopeContext,
};
use azure_nuke_test_utils::{
    ConcurrencyGauge, FailingHandler, PanickingHandler, RecordingHandler, SkippingHandler,
    SlowHandler, StaticHandler, Timeline,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

fn ctx() -> ScopeContext {
    ScopeContext::resource_group("tenant-1", "sub-1", "rg-1")
}

fn register(
    registry: &mut Registry,
    name: &str,
    handler: Arc<dyn ResourceHandler>,
    deps: &[&str],
) {
    registry
        .register(
            Registration::new(name, handler)
                .with_scope(ResourceScope::ResourceGroup)
                .depends_on(deps.iter().copied()),
        )
        .unwrap();
}

/// A handler that sleeps `ms` then lists `count` items, recorded on `timeline`
fn recorded(name: &str, ms: u64, count: usize, timeline: &Timeline) -> Arc<dyn ResourceHandler> {
    let inner = Arc::new(SlowHandler::new(Duration::from_millis(ms), count));
    Arc::new(RecordingHandler::new(name, inner, timeline))
}

#[tokio::test(start_paused = true)]
async fn dependent_starts_after_dependency_finishes() {
    let timeline = Timeline::new();
    let mut registry = Registry::new();
    let vm = recorded("VirtualMachine", 50, 2, &timeline);
    let disk = recorded("Disk", 10, 3, &timeline);
    register(&mut registry, "VirtualMachine", vm, &[]);
    register(&mut registry, "Disk", disk, &["VirtualMachine"]);

    let registry = Arc::new(registry);
    let order = registry
        .resolve_order(&["Disk", "VirtualMachine"], ResourceScope::ResourceGroup)
        .unwrap();
    assert_eq!(order, ["VirtualMachine", "Disk"]);

    let mut queue = Queue::new();
    let report = Scanner::new(Arc::clone(&registry))
        .scan(ctx(), &order)
        .unwrap()
        .collect_into(&mut queue)
        .await;

    assert_eq!(queue.len(), 5);
    assert_eq!(report.listed(), 5);

    let vm = timeline.entry("VirtualMachine").unwrap();
    let disk = timeline.entry("Disk").unwrap();
    assert!(disk.started >= vm.ended, "Disk started before VirtualMachine ended");

    let vm_positions: Vec<_> = queue
        .iter()
        .enumerate()
        .filter(|(_, i)| i.type_name() == "VirtualMachine")
        .map(|(p, _)| p)
        .collect();
    assert_eq!(vm_positions, [0, 1]);
}

#[tokio::test(start_paused = true)]
async fn chain_gates_every_link() {
    let timeline = Timeline::new();
    let mut registry = Registry::new();
    register(&mut registry, "A", recorded("A", 30, 1, &timeline), &[]);
    register(&mut registry, "B", recorded("B", 20, 1, &timeline), &["A"]);
    register(&mut registry, "C", recorded("C", 10, 1, &timeline), &["B"]);
    let scanner = Scanner::new(Arc::new(registry));

    let report = scanner.scan(ctx(), &["A", "B", "C"]).unwrap().finish().await;
    assert_eq!(report.types.len(), 3);

    let a = timeline.entry("A").unwrap();
    let b = timeline.entry("B").unwrap();
    let c = timeline.entry("C").unwrap();
    assert!(b.started >= a.ended);
    assert!(c.started >= b.ended);
}

#[tokio::test]
async fn every_item_is_new_and_tagged() {
    let mut registry = Registry::new();
    register(&mut registry, "StorageAccount", Arc::new(StaticHandler::new("sa", 4)), &[]);
    let scanner = Scanner::new(Arc::new(registry));

    let items: Vec<_> = scanner
        .scan(ctx(), &["StorageAccount"])
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 4);
    for item in &items {
        assert_eq!(item.state(), ItemState::New);
        assert_eq!(item.type_name(), "StorageAccount");
        assert_eq!(item.context(), &ctx());
    }
}

#[tokio::test]
async fn panicking_handler_is_isolated() {
    let mut registry = Registry::new();
    register(&mut registry, "Exploding", Arc::new(PanickingHandler), &[]);
    register(&mut registry, "Broken", Arc::new(FailingHandler("HTTP 500".to_string())), &[]);
    register(&mut registry, "Disk", Arc::new(StaticHandler::new("disk", 3)), &[]);
    let scanner = Scanner::new(Arc::new(registry));

    let mut queue = Queue::new();
    let report = scanner
        .scan(ctx(), &["Exploding", "Broken", "Disk"])
        .unwrap()
        .collect_into(&mut queue)
        .await;

    assert_eq!(queue.len(), 3);
    assert!(queue.iter().all(|i| i.type_name() == "Disk"));
    assert!(matches!(
        report.outcome("Exploding"),
        Some(HandlerOutcome::Panicked(msg)) if msg.contains("handler exploded")
    ));
    assert!(matches!(report.outcome("Broken"), Some(HandlerOutcome::Failed(_))));
    assert_eq!(report.outcome("Disk"), Some(&HandlerOutcome::Listed(3)));
    assert_eq!(report.failures().count(), 2);
}

#[tokio::test]
async fn skipped_type_lists_nothing_and_is_not_a_failure() {
    let mut registry = Registry::new();
    let skip = Arc::new(SkippingHandler("NoRegisteredProviderFound".to_string()));
    register(&mut registry, "Unsupported", skip, &[]);
    register(&mut registry, "Disk", Arc::new(StaticHandler::new("disk", 1)), &["Unsupported"]);
    let scanner = Scanner::new(Arc::new(registry));

    let mut queue = Queue::new();
    let report = scanner
        .scan(ctx(), &["Unsupported", "Disk"])
        .unwrap()
        .collect_into(&mut queue)
        .await;

    assert_eq!(queue.len(), 1);
    assert_eq!(report.failures().count(), 0);
    assert_eq!(report.skipped().count(), 1);
}

#[tokio::test]
async fn dependents_of_a_panicking_handler_still_run() {
    let mut registry = Registry::new();
    register(&mut registry, "VirtualMachine", Arc::new(PanickingHandler), &[]);
    register(&mut registry, "Disk", Arc::new(StaticHandler::new("disk", 2)), &["VirtualMachine"]);
    let scanner = Scanner::new(Arc::new(registry));

    let mut queue = Queue::new();
    let report = scanner
        .scan(ctx(), &["VirtualMachine", "Disk"])
        .unwrap()
        .collect_into(&mut queue)
        .await;

    assert_eq!(queue.len(), 2);
    assert!(report.outcome("VirtualMachine").unwrap().is_failure());
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_is_never_exceeded() {
    let gauge = ConcurrencyGauge::new(Duration::from_millis(25));
    let mut registry = Registry::new();
    let names: Vec<String> = (0..12).map(|i| format!("Type{i}")).collect();
    for name in &names {
        register(&mut registry, name, gauge.clone(), &[]);
    }
    let scanner = Scanner::new(Arc::new(registry)).with_config(ScannerConfig {
        max_concurrency: 3,
        ..Default::default()
    });

    let report = scanner.scan(ctx(), &names).unwrap().finish().await;

    assert_eq!(report.types.len(), 12);
    assert_eq!(gauge.calls(), 12);
    assert!(gauge.peak() <= 3, "peak concurrency {}", gauge.peak());
    assert!(gauge.peak() >= 2, "handlers never overlapped");
}

#[tokio::test(start_paused = true)]
async fn hanging_handler_times_out() {
    let mut registry = Registry::new();
    let stuck = Arc::new(SlowHandler::new(Duration::from_secs(3600), 1));
    register(&mut registry, "Stuck", stuck, &[]);
    register(&mut registry, "Disk", Arc::new(StaticHandler::new("disk", 1)), &["Stuck"]);
    let scanner = Scanner::new(Arc::new(registry)).with_config(ScannerConfig {
        handler_timeout: Duration::from_secs(2),
        ..Default::default()
    });

    let mut queue = Queue::new();
    let report = scanner
        .scan(ctx(), &["Stuck", "Disk"])
        .unwrap()
        .collect_into(&mut queue)
        .await;

    assert_eq!(
        report.outcome("Stuck"),
        Some(&HandlerOutcome::TimedOut(Duration::from_secs(2)))
    );
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn unordered_scan_list_is_rejected() {
    let mut registry = Registry::new();
    register(&mut registry, "VirtualMachine", Arc::new(StaticHandler::new("vm", 1)), &[]);
    register(&mut registry, "Disk", Arc::new(StaticHandler::new("disk", 1)), &["VirtualMachine"]);
    let scanner = Scanner::new(Arc::new(registry));

    assert!(scanner.scan(ctx(), &["Disk", "VirtualMachine"]).is_err());
}

#[tokio::test]
async fn wrong_scope_is_rejected() {
    let mut registry = Registry::new();
    register(&mut registry, "Disk", Arc::new(StaticHandler::new("disk", 1)), &[]);
    let scanner = Scanner::new(Arc::new(registry));

    let subscription = ScopeContext::subscription("tenant-1", "sub-1");
    assert!(scanner.scan(subscription, &["Disk"]).is_err());
}
