//! Shared test utilities for azure-nuke
//!
//! Fakes that stand in for Azure so the engine can be exercised without a
//! tenant.
//!
//! ## Modules
//!
//! - [`management`]: In-memory management plane with paging
//! - [`handlers`]: Handlers that list, fail, panic, hang, or record timing
//! - [`resource`]: A removable resource that records what happened to it

pub mod handlers;
pub mod management;
pub mod resource;

pub use handlers::{
    ConcurrencyGauge, FailingHandler, FixedHandler, PanickingHandler, RecordingHandler,
    SkippingHandler, SlowHandler, StaticHandler, Timeline, TimelineEntry,
};
pub use management::FakeManagement;
pub use resource::FakeResource;
