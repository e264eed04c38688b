//! azure-nuke: remove every resource in an Azure tenant
//!
//! Lists everything the built-in handlers know about, prints what would be
//! removed, and removes it only when `--no-dry-run` is passed.

use anyhow::{Context, Result};
use azure_nuke_common::defaults::{
    DEFAULT_ENUMERATION_TIMEOUT_SECS, DEFAULT_HANDLER_TIMEOUT_SECS, DEFAULT_LOGIN_ENDPOINT,
    DEFAULT_MANAGEMENT_ENDPOINT, DEFAULT_SCAN_CONCURRENCY,
};
use azure_nuke_core::arm::ArmClient;
use azure_nuke_core::auth::{
    Audience, AuthorizerProvider, ClientSecretProvider, StaticTokenProvider,
};
use azure_nuke_core::config::{RunConfig, RuntimeFlags, ScanSettings, TenantConfig};
use azure_nuke_core::error::AuthenticationError;
use azure_nuke_core::resources::register_builtin;
use azure_nuke_core::{Registry, Runner};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "azure-nuke")]
#[command(about = "Remove all resources from an Azure tenant")]
#[command(version)]
struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Credential options shared by every command that talks to Azure
#[derive(clap::Args, Debug)]
struct CredentialArgs {
    /// Application (client) ID for client-secret authentication
    #[arg(long, env = "AZURE_CLIENT_ID")]
    client_id: Option<String>,

    /// Client secret for client-secret authentication
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Pre-acquired management-plane bearer token
    #[arg(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Identity platform endpoint
    #[arg(long, default_value = DEFAULT_LOGIN_ENDPOINT)]
    login_endpoint: String,

    /// Resource Manager endpoint
    #[arg(long, default_value = DEFAULT_MANAGEMENT_ENDPOINT)]
    management_endpoint: String,
}

/// Arguments for the run command
#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Tenant to clean
    #[arg(long, env = "AZURE_TENANT_ID")]
    tenant_id: String,

    /// Comma-separated subscription IDs to scan (default: all visible)
    #[arg(long, value_delimiter = ',')]
    subscriptions: Vec<String>,

    /// Comma-separated regions to scan (default: all available)
    #[arg(long, value_delimiter = ',')]
    regions: Vec<String>,

    /// Comma-separated resource types to scan (default: all registered)
    #[arg(long, value_delimiter = ',')]
    resource_types: Vec<String>,

    /// Comma-separated resource types never to scan
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Actually remove resources (default is dry-run)
    #[arg(long)]
    no_dry_run: bool,

    /// Maximum handlers running at once within one scope
    #[arg(long, default_value_t = DEFAULT_SCAN_CONCURRENCY)]
    max_concurrency: usize,

    /// Deadline for one handler invocation, in seconds
    #[arg(long, default_value_t = DEFAULT_HANDLER_TIMEOUT_SECS)]
    handler_timeout: u64,

    /// Deadline for resolving the tenant hierarchy, in seconds
    #[arg(long, default_value_t = DEFAULT_ENUMERATION_TIMEOUT_SECS)]
    enumeration_timeout: u64,

    #[command(flatten)]
    credentials: CredentialArgs,
}

impl RunArgs {
    fn to_config(&self) -> RunConfig {
        RunConfig {
            tenant: TenantConfig {
                tenant_id: self.tenant_id.clone(),
                subscriptions: self.subscriptions.clone(),
                regions: self.regions.clone(),
            },
            scan: ScanSettings {
                max_concurrency: self.max_concurrency,
                handler_timeout: Duration::from_secs(self.handler_timeout),
                enumeration_timeout: Duration::from_secs(self.enumeration_timeout),
            },
            flags: RuntimeFlags {
                dry_run: !self.no_dry_run,
                resource_types: self.resource_types.clone(),
                exclude_types: self.exclude.clone(),
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the registered resource types
    ResourceTypes,

    /// Scan the tenant and remove what was found
    Run(Box<RunArgs>),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    match args.command {
        Command::ResourceTypes => handle_resource_types(),
        Command::Run(run_args) => handle_run(*run_args).await,
    }
}

/// Build the authorizer from whichever credentials were supplied
fn authorizer(tenant_id: &str, creds: &CredentialArgs) -> Result<Arc<dyn AuthorizerProvider>> {
    if let Some(token) = &creds.access_token {
        info!("Using pre-acquired access token");
        return Ok(Arc::new(
            StaticTokenProvider::new().with_token(Audience::Management, token.clone()),
        ));
    }

    match (&creds.client_id, &creds.client_secret) {
        (Some(client_id), Some(secret)) => {
            info!(client_id = %client_id, "Using client-secret credentials");
            Ok(Arc::new(
                ClientSecretProvider::new(tenant_id, client_id, secret)
                    .with_login_endpoint(&creds.login_endpoint),
            ))
        }
        _ => Err(AuthenticationError::MissingCredentials(
            "set AZURE_ACCESS_TOKEN, or both AZURE_CLIENT_ID and AZURE_CLIENT_SECRET".to_string(),
        )
        .into()),
    }
}

fn builtin_registry(client: &ArmClient) -> Result<Registry> {
    let mut registry = Registry::new();
    register_builtin(&mut registry, client).context("Failed to register built-in resource types")?;
    Ok(registry)
}

/// Handle the resource-types command
fn handle_resource_types() -> Result<()> {
    let auth = Arc::new(StaticTokenProvider::new());
    let registry = builtin_registry(&ArmClient::new(auth))?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Resource Type"),
            Cell::new("Scope"),
            Cell::new("Depends On"),
        ]);
    for entry in registry.iter() {
        table.add_row(vec![
            Cell::new(entry.name()),
            Cell::new(entry.scope()),
            Cell::new(entry.depends_on().join(", ")),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Handle the run command
async fn handle_run(args: RunArgs) -> Result<()> {
    let config = args.to_config();
    config.validate().context("Invalid configuration")?;

    let auth = authorizer(config.tenant_id(), &args.credentials)?;
    // Fail on bad credentials before any listing starts.
    auth.authorizer(Audience::Management)
        .await
        .context("Failed to acquire a management-plane token")?;

    let client = ArmClient::new(auth).with_endpoint(&args.credentials.management_endpoint);
    let registry = Arc::new(builtin_registry(&client)?);

    info!(
        tenant_id = %config.tenant_id(),
        subscriptions = ?config.tenant.subscriptions,
        regions = ?config.tenant.regions,
        dry_run = config.dry_run(),
        "Starting run"
    );

    let report = Runner::new(registry, config).run(client).await?;

    if report.removal.is_none() {
        println!("\nDry run: nothing was removed. Run with --no-dry-run to remove resources.");
    }
    if let Some(removal) = &report.removal
        && removal.failed > 0
    {
        anyhow::bail!("{} resources could not be removed", removal.failed);
    }
    Ok(())
}
