//! Azure Resource Manager access
//!
//! - `client`: REST calls, paging and deletes against the management endpoint
//! - `error`: classification of ARM failures by error code

pub mod client;
pub mod error;

pub use client::{ArmClient, GenericResource, ListPage, ResourceId};
pub use error::{ArmError, classify_response};
