//! Configuration types for a run

use crate::scanner::ScannerConfig;
use anyhow::{Result, bail};
use azure_nuke_common::defaults::{
    DEFAULT_ENUMERATION_TIMEOUT_SECS, DEFAULT_HANDLER_TIMEOUT_SECS, DEFAULT_ITEM_CHANNEL_CAPACITY,
    DEFAULT_SCAN_CONCURRENCY,
};
use std::time::Duration;

/// Which part of the tenant to touch
#[derive(Debug, Clone, Default)]
pub struct TenantConfig {
    /// Tenant the credential must resolve to
    pub tenant_id: String,
    /// Subscriptions to scan (empty = all visible)
    pub subscriptions: Vec<String>,
    /// Regions to scan (empty = all available)
    pub regions: Vec<String>,
}

/// Scanner limits
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Maximum handlers running at once within one scope
    pub max_concurrency: usize,
    /// Deadline for one handler invocation
    pub handler_timeout: Duration,
    /// Deadline for resolving the tenant hierarchy
    pub enumeration_timeout: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_SCAN_CONCURRENCY,
            handler_timeout: Duration::from_secs(DEFAULT_HANDLER_TIMEOUT_SECS),
            enumeration_timeout: Duration::from_secs(DEFAULT_ENUMERATION_TIMEOUT_SECS),
        }
    }
}

/// Runtime behavior flags
#[derive(Debug, Clone)]
pub struct RuntimeFlags {
    /// List and filter only, never remove
    pub dry_run: bool,
    /// Resource types to scan (empty = every registered type)
    pub resource_types: Vec<String>,
    /// Resource types never scanned
    pub exclude_types: Vec<String>,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            dry_run: true,
            resource_types: Vec::new(),
            exclude_types: Vec::new(),
        }
    }
}

/// Configuration for a run, composed of focused sub-configs
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub tenant: TenantConfig,
    pub scan: ScanSettings,
    pub flags: RuntimeFlags,
}

impl RunConfig {
    pub fn tenant_id(&self) -> &str {
        &self.tenant.tenant_id
    }

    pub fn dry_run(&self) -> bool {
        self.flags.dry_run
    }

    /// Reject settings the scanner cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.tenant.tenant_id.trim().is_empty() {
            bail!("tenant id must not be empty");
        }
        if self.scan.max_concurrency == 0 {
            bail!("max concurrency must be at least 1");
        }
        if self.scan.handler_timeout.is_zero() {
            bail!("handler timeout must be greater than zero");
        }
        if self.scan.enumeration_timeout.is_zero() {
            bail!("enumeration timeout must be greater than zero");
        }
        if let Some(both) = self
            .flags
            .resource_types
            .iter()
            .find(|t| self.flags.exclude_types.contains(t))
        {
            bail!("resource type '{both}' is both selected and excluded");
        }
        Ok(())
    }

    /// True if `type_name` passes the allow and exclude lists
    pub fn selects_type(&self, type_name: &str) -> bool {
        let allowed = self.flags.resource_types.is_empty()
            || self.flags.resource_types.iter().any(|t| t == type_name);
        allowed && !self.flags.exclude_types.iter().any(|t| t == type_name)
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            max_concurrency: self.scan.max_concurrency,
            handler_timeout: self.scan.handler_timeout,
            channel_capacity: DEFAULT_ITEM_CHANNEL_CAPACITY,
        }
    }
}
