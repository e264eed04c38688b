//! azure-nuke-core - discover and remove Azure resources
//!
//! Resource types register a handler, a scope and their removal
//! dependencies in a [`Registry`]. A run resolves the tenant hierarchy once,
//! scans every scope with a bounded-concurrency [`Scanner`] that starts a
//! type only after its dependencies finished listing, and feeds the
//! discovered [`Item`]s through filtering and removal.

pub mod arm;
pub mod auth;
pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod resources;
pub mod runner;
pub mod scanner;
pub mod tenant;

pub use error::{AuthenticationError, HandlerError, ItemError, RegistryError, TenantError};
pub use queue::{Item, Queue, QueueSummary};
pub use registry::{RegisteredType, Registration, Registry};
pub use resource::{Properties, Resource, ResourceHandler, ScopeContext};
pub use runner::{AcceptAll, ItemFilter, RemovalReport, Runner};
pub use scanner::{HandlerOutcome, ScanReport, ScanStream, Scanner, ScannerConfig};
pub use tenant::{ManagementOperations, Page, ScopeEnumerator, TenantSnapshot};

pub use azure_nuke_common::{ItemState, ResourceScope};
