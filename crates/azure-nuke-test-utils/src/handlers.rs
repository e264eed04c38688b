//! Fake resource handlers

use crate::resource::FakeResource;
use async_trait::async_trait;
use azure_nuke_core::{HandlerError, Resource, ResourceHandler, ScopeContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn fake_resources(prefix: &str, count: usize) -> Vec<Box<dyn Resource>> {
    (0..count)
        .map(|i| Box::new(FakeResource::new(format!("{prefix}-{i}"))) as Box<dyn Resource>)
        .collect()
}

/// Lists `count` resources named `{prefix}-{i}`
#[derive(Debug, Clone)]
pub struct StaticHandler {
    prefix: String,
    count: usize,
}

impl StaticHandler {
    pub fn new(prefix: impl Into<String>, count: usize) -> Self {
        Self {
            prefix: prefix.into(),
            count,
        }
    }
}

#[async_trait]
impl ResourceHandler for StaticHandler {
    async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        Ok(fake_resources(&self.prefix, self.count))
    }
}

/// Lists clones of the given resources on every call
#[derive(Debug, Clone, Default)]
pub struct FixedHandler(pub Vec<FakeResource>);

#[async_trait]
impl ResourceHandler for FixedHandler {
    async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        Ok(self
            .0
            .iter()
            .cloned()
            .map(|r| Box::new(r) as Box<dyn Resource>)
            .collect())
    }
}

/// Panics on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingHandler;

#[async_trait]
impl ResourceHandler for PanickingHandler {
    async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        panic!("handler exploded");
    }
}

/// Returns a hard error on every call
#[derive(Debug, Clone)]
pub struct FailingHandler(pub String);

#[async_trait]
impl ResourceHandler for FailingHandler {
    async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        Err(anyhow::anyhow!("{}", self.0).into())
    }
}

/// Reports the type as not applicable
#[derive(Debug, Clone)]
pub struct SkippingHandler(pub String);

#[async_trait]
impl ResourceHandler for SkippingHandler {
    async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        Err(HandlerError::skip(self.0.clone()))
    }
}

/// Sleeps before listing `count` resources
#[derive(Debug, Clone)]
pub struct SlowHandler {
    delay: Duration,
    count: usize,
}

impl SlowHandler {
    pub fn new(delay: Duration, count: usize) -> Self {
        Self { delay, count }
    }
}

#[async_trait]
impl ResourceHandler for SlowHandler {
    async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        tokio::time::sleep(self.delay).await;
        Ok(fake_resources("slow", self.count))
    }
}

/// Tracks how many calls are in flight at once
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    hold: Duration,
}

impl ConcurrencyGauge {
    /// Each call stays in flight for `hold`
    pub fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            ..Default::default()
        })
    }

    /// Highest number of simultaneous calls observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceHandler for ConcurrencyGauge {
    async fn list(&self, _ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// When one handler call started and ended
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub type_name: String,
    pub started: Instant,
    pub ended: Instant,
}

/// Shared log of handler calls, in completion order
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<TimelineEntry>>>);

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// The entry recorded for `type_name`, if it ran
    pub fn entry(&self, type_name: &str) -> Option<TimelineEntry> {
        self.entries().into_iter().find(|e| e.type_name == type_name)
    }

    fn record(&self, entry: TimelineEntry) {
        if let Ok(mut entries) = self.0.lock() {
            entries.push(entry);
        }
    }
}

/// Wraps a handler and records its start and end on a [`Timeline`]
pub struct RecordingHandler {
    type_name: String,
    inner: Arc<dyn ResourceHandler>,
    timeline: Timeline,
}

impl RecordingHandler {
    pub fn new(
        type_name: impl Into<String>,
        inner: Arc<dyn ResourceHandler>,
        timeline: &Timeline,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            inner,
            timeline: timeline.clone(),
        }
    }
}

#[async_trait]
impl ResourceHandler for RecordingHandler {
    async fn list(&self, ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        let started = Instant::now();
        let result = self.inner.list(ctx).await;
        self.timeline.record(TimelineEntry {
            type_name: self.type_name.clone(),
            started,
            ended: Instant::now(),
        });
        result
    }
}
