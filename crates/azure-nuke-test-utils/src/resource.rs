//! Fake resources

use async_trait::async_trait;
use azure_nuke_core::{Properties, Resource};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A resource whose removal is counted and can be made to fail
#[derive(Debug, Clone)]
pub struct FakeResource {
    name: String,
    fail_with: Option<String>,
    veto: Option<String>,
    removals: Arc<AtomicUsize>,
}

impl FakeResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_with: None,
            veto: None,
            removals: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `remove` fail with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Make the resource veto its own removal
    pub fn protected(mut self, reason: impl Into<String>) -> Self {
        self.veto = Some(reason.into());
        self
    }

    /// Count removals into a shared counter
    pub fn counting(mut self, removals: &Arc<AtomicUsize>) -> Self {
        self.removals = Arc::clone(removals);
        self
    }

    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resource for FakeResource {
    async fn remove(&self) -> anyhow::Result<()> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(message) => anyhow::bail!("{message}"),
            None => Ok(()),
        }
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn properties(&self) -> Properties {
        Properties::from([("Name".to_string(), self.name.clone())])
    }

    fn filter(&self) -> Option<String> {
        self.veto.clone()
    }
}
