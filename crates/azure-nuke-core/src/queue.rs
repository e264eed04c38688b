//! Discovered items and the queue that holds them
//!
//! Items are produced by the scanner and then handed, one at a time, to the
//! single-threaded filter/removal loop. The two phases never overlap, so the
//! queue needs no internal locking.

use crate::error::ItemError;
use crate::resource::{Properties, Resource, ScopeContext};
use azure_nuke_common::ItemState;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A discovered resource and its lifecycle state
#[derive(Debug)]
pub struct Item {
    resource: Box<dyn Resource>,
    type_name: String,
    context: ScopeContext,
    state: ItemState,
    reason: Option<String>,
    discovered_at: DateTime<Utc>,
}

impl Item {
    /// Create an item in state [`ItemState::New`]
    pub fn new(resource: Box<dyn Resource>, type_name: impl Into<String>, context: ScopeContext) -> Self {
        Self {
            resource,
            type_name: type_name.into(),
            context,
            state: ItemState::New,
            reason: None,
            discovered_at: Utc::now(),
        }
    }

    pub fn resource(&self) -> &dyn Resource {
        self.resource.as_ref()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn context(&self) -> &ScopeContext {
        &self.context
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    /// Why the item was filtered or failed, if it was
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub fn display_name(&self) -> String {
        self.resource.display_name()
    }

    pub fn properties(&self) -> Properties {
        self.resource.properties()
    }

    /// Move to `next`, recording an optional reason.
    ///
    /// Illegal transitions leave the item untouched.
    pub fn transition(&mut self, next: ItemState, reason: Option<String>) -> Result<(), ItemError> {
        if !self.state.can_transition_to(next) {
            return Err(ItemError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if reason.is_some() {
            self.reason = reason;
        }
        Ok(())
    }
}

/// Items in discovery order
#[derive(Debug, Default)]
pub struct Queue {
    items: Vec<Item>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Item> {
        self.items.iter_mut()
    }

    /// Number of items currently in `state`
    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }

    /// Item counts per resource type, sorted by type name
    pub fn count_by_type(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.type_name.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn summary(&self) -> QueueSummary {
        let mut summary = QueueSummary {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.state {
                ItemState::New => summary.new += 1,
                ItemState::Filtered => summary.filtered += 1,
                ItemState::Pending => summary.pending += 1,
                ItemState::Waiting => summary.waiting += 1,
                ItemState::Finished => summary.finished += 1,
                ItemState::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

impl Extend<Item> for Queue {
    fn extend<T: IntoIterator<Item = Item>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}

impl IntoIterator for Queue {
    type Item = Item;
    type IntoIter = std::vec::IntoIter<Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Queue {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Counts by state, for the operator summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueSummary {
    pub total: usize,
    pub new: usize,
    pub filtered: usize,
    pub pending: usize,
    pub waiting: usize,
    pub finished: usize,
    pub failed: usize,
}

impl QueueSummary {
    /// Items not rejected by the filter stage
    pub fn removable(&self) -> usize {
        self.total - self.filtered
    }
}

impl fmt::Display for QueueSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} removable, {} filtered",
            self.total,
            self.removable(),
            self.filtered
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Resource for Named {
        async fn remove(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn display_name(&self) -> String {
            self.0.to_string()
        }
    }

    fn item(name: &'static str, type_name: &str) -> Item {
        Item::new(
            Box::new(Named(name)),
            type_name,
            ScopeContext::subscription("t", "s"),
        )
    }

    #[test]
    fn test_new_item_state() {
        let item = item("vm-1", "VirtualMachine");
        assert_eq!(item.state(), ItemState::New);
        assert_eq!(item.type_name(), "VirtualMachine");
        assert_eq!(item.display_name(), "vm-1");
        assert!(item.reason().is_none());
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let mut item = item("vm-1", "VirtualMachine");
        let err = item.transition(ItemState::Finished, None).unwrap_err();
        assert_eq!(err.from, ItemState::New);
        assert_eq!(item.state(), ItemState::New);
    }

    #[test]
    fn test_reason_is_kept() {
        let mut item = item("vm-1", "VirtualMachine");
        item.transition(ItemState::Pending, None).unwrap();
        item.transition(ItemState::Failed, Some("409 Conflict".into()))
            .unwrap();
        assert_eq!(item.reason(), Some("409 Conflict"));
        assert!(item.state().is_terminal());
    }

    #[test]
    fn test_summary_counts() {
        let mut queue = Queue::new();
        queue.extend([
            item("a", "Disk"),
            item("b", "Disk"),
            item("c", "VirtualMachine"),
        ]);
        queue
            .iter_mut()
            .next()
            .unwrap()
            .transition(ItemState::Filtered, Some("protected".into()))
            .unwrap();

        let summary = queue.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.filtered, 1);
        assert_eq!(summary.new, 2);
        assert_eq!(summary.removable(), 2);
        assert_eq!(summary.to_string(), "3 total, 2 removable, 1 filtered");
        assert_eq!(queue.count(ItemState::New), 2);
    }

    #[test]
    fn test_preserves_discovery_order() {
        let mut queue = Queue::new();
        for name in ["first", "second", "third"] {
            queue.push(item(name, "Disk"));
        }
        let names: Vec<_> = queue.iter().map(Item::display_name).collect();
        assert_eq!(names, ["first", "second", "third"]);
        assert_eq!(queue.count_by_type().get("Disk"), Some(&3));
    }
}
