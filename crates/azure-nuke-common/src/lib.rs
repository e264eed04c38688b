//! azure-nuke-common - Shared types and constants
//!
//! This crate provides the vocabulary shared by the scanning engine, the
//! built-in resource handlers and the test fixtures, without pulling in any
//! HTTP or async runtime dependencies.
//!
//! ## Modules
//!
//! - [`defaults`]: Default tuning values (concurrency, timeouts, endpoints)
//! - [`item_state`]: Lifecycle states of a discovered resource
//! - [`scope`]: Hierarchy levels at which resource types are discovered

pub mod defaults;
pub mod item_state;
pub mod scope;

// Re-export commonly used types
pub use item_state::ItemState;
pub use scope::ResourceScope;
