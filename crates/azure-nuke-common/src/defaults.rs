//! Default configuration values shared by the engine and the CLI

/// Maximum number of resource-type handlers executing at once in one scan
pub const DEFAULT_SCAN_CONCURRENCY: usize = 16;

/// Overall deadline for resolving the tenant hierarchy, in seconds
pub const DEFAULT_ENUMERATION_TIMEOUT_SECS: u64 = 15;

/// Deadline for a single handler's listing call, in seconds
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 30;

/// Capacity of the channel carrying discovered items to the consumer
pub const DEFAULT_ITEM_CHANNEL_CAPACITY: usize = 1024;

/// Azure Resource Manager endpoint
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Microsoft identity platform endpoint
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// API version for tenant and subscription listing
pub const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";

/// API version for resource group listing and deletion
pub const RESOURCE_GROUPS_API_VERSION: &str = "2021-04-01";
