// # zoneguardd - Scheduled DNS Change Daemon
//
// Thin integration layer over zoneguard-core. All snapshot, rollback and
// scheduling logic lives in the library; this binary only:
//
// 1. Reads configuration from environment variables
// 2. Opens the document store and builds the credential chain
// 3. Runs the schedule executor until SIGINT/SIGTERM
//
// ## Configuration
//
// ### Storage
// - `ZONEGUARD_STORAGE`: Document store (memory, file, disabled). Default: file
// - `ZONEGUARD_STORAGE_PATH`: Path to the store file (for file storage)
//
// ### Schedule
// - `ZONEGUARD_SWEEP_INTERVAL_SECS`: Seconds between sweeps (10..=3600). Default: 60
// - `ZONEGUARD_CLEANUP_AGE_HOURS`: Hours finished entries are kept. Default: 24
// - `ZONEGUARD_ADMIN_USERNAME`: Identity allowed to use environment tokens. Default: admin
//
// ### Provider
// - `ZONEGUARD_PROVIDER_MODE`: `live` or `dry-run`. Default: live
// - `CF_API_TOKEN`, `CF_API_TOKEN1`, ...: Admin tokens for accounts 0, 1, ...
//
// ### Logging
// - `ZONEGUARD_LOG_LEVEL`: trace, debug, info, warn, error. Default: info
//
// ## Example
//
// ```bash
// export ZONEGUARD_STORAGE=file
// export ZONEGUARD_STORAGE_PATH=/var/lib/zoneguard/store.json
// export CF_API_TOKEN=your_token
//
// zoneguardd
// ```

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use zoneguard_core::traits::DnsProvider;
use zoneguard_core::{
    CredentialChain, EnvCredentialProvider, GuardConfig, ScheduleConfig, StorageConfig,
    StoredCredentialProvider, TracingEventSink, ZoneGuard, open_store,
};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ZoneguardExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ZoneguardExitCode> for ExitCode {
    fn from(code: ZoneguardExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
#[derive(Debug)]
struct Config {
    storage_type: String,
    storage_path: Option<String>,
    sweep_interval_secs: u64,
    cleanup_age_hours: u64,
    admin_username: String,
    provider_mode: String,
    log_level: String,
}

fn parse_number(name: &str, value: Option<String>, default: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a whole number. Got: {}", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            storage_type: lookup("ZONEGUARD_STORAGE").unwrap_or_else(|| "file".to_string()),
            storage_path: lookup("ZONEGUARD_STORAGE_PATH"),
            sweep_interval_secs: parse_number(
                "ZONEGUARD_SWEEP_INTERVAL_SECS",
                lookup("ZONEGUARD_SWEEP_INTERVAL_SECS"),
                60,
            )?,
            cleanup_age_hours: parse_number(
                "ZONEGUARD_CLEANUP_AGE_HOURS",
                lookup("ZONEGUARD_CLEANUP_AGE_HOURS"),
                24,
            )?,
            admin_username: lookup("ZONEGUARD_ADMIN_USERNAME")
                .unwrap_or_else(|| "admin".to_string()),
            provider_mode: lookup("ZONEGUARD_PROVIDER_MODE").unwrap_or_else(|| "live".to_string()),
            log_level: lookup("ZONEGUARD_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.storage_type.as_str() {
            "memory" | "disabled" => {}
            "file" => match self.storage_path.as_deref() {
                None | Some("") => anyhow::bail!(
                    "ZONEGUARD_STORAGE_PATH is required when ZONEGUARD_STORAGE=file. \
                    Set it via: export ZONEGUARD_STORAGE_PATH=/var/lib/zoneguard/store.json"
                ),
                Some(path) => {
                    if let Some(parent) = std::path::Path::new(path).parent()
                        && !parent.as_os_str().is_empty()
                        && !parent.exists()
                    {
                        anyhow::bail!(
                            "ZONEGUARD_STORAGE_PATH parent directory does not exist: {}. \
                            Create it first: sudo mkdir -p {}",
                            parent.display(),
                            parent.display()
                        );
                    }
                }
            },
            _ => anyhow::bail!(
                "ZONEGUARD_STORAGE '{}' is not supported. \
                Supported types: file, memory, disabled",
                self.storage_type
            ),
        }

        if !(10..=3600).contains(&self.sweep_interval_secs) {
            anyhow::bail!(
                "ZONEGUARD_SWEEP_INTERVAL_SECS must be between 10 and 3600 seconds. Got: {}",
                self.sweep_interval_secs
            );
        }

        match self.provider_mode.as_str() {
            "live" | "dry-run" => {}
            _ => anyhow::bail!(
                "ZONEGUARD_PROVIDER_MODE '{}' is not valid. Valid modes: live, dry-run",
                self.provider_mode
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ZONEGUARD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.guard_config().validate()?;
        Ok(())
    }

    fn storage(&self) -> StorageConfig {
        match self.storage_type.as_str() {
            "memory" => StorageConfig::Memory,
            "disabled" => StorageConfig::Disabled,
            _ => StorageConfig::File {
                path: self.storage_path.clone().unwrap_or_default(),
            },
        }
    }

    fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            storage: self.storage(),
            schedule: ScheduleConfig {
                cleanup_age_hours: self.cleanup_age_hours,
                sweep_interval_secs: self.sweep_interval_secs,
                admin_username: self.admin_username.clone(),
            },
            ..GuardConfig::default()
        }
    }

    fn dry_run(&self) -> bool {
        self.provider_mode == "dry-run"
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ZoneguardExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ZoneguardExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ZoneguardExitCode::ConfigError.into();
    }

    info!("Starting zoneguardd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ZoneguardExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            ZoneguardExitCode::RuntimeError
        } else {
            ZoneguardExitCode::CleanShutdown
        }
    });

    result.into()
}

#[cfg(feature = "cloudflare")]
fn build_provider(config: &Config) -> Result<Arc<dyn DnsProvider>> {
    let provider = zoneguard_provider_cloudflare::CloudflareProvider::new(config.dry_run())
        .context("Failed to create Cloudflare provider")?;
    if provider.is_dry_run() {
        warn!("Cloudflare provider running in DRY-RUN mode - no changes will be made");
    }
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "cloudflare"))]
fn build_provider(_config: &Config) -> Result<Arc<dyn DnsProvider>> {
    anyhow::bail!("zoneguardd was built without a DNS provider (enable the `cloudflare` feature)")
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let guard_config = config.guard_config();

    let store = open_store(&guard_config.storage)
        .await
        .context("Failed to open document store")?;
    info!("Document store: {}", guard_config.storage.type_name());

    let provider = build_provider(&config)?;

    let env_tokens = EnvCredentialProvider::from_env(config.admin_username.clone());
    info!(
        "{} environment token(s) for {}",
        env_tokens.token_count(),
        config.admin_username
    );

    let mut credentials = CredentialChain::new();
    if let Some(store) = &store {
        credentials = credentials.with_provider(Arc::new(StoredCredentialProvider::new(store.clone())));
    }
    credentials = credentials.with_provider(Arc::new(env_tokens));

    let guard = ZoneGuard::new(store, provider, Arc::new(TracingEventSink), &guard_config);
    if !guard.schedules().is_available() {
        warn!("Storage is disabled: there are no scheduled changes to execute");
        return Ok(());
    }

    let executor = guard.executor(credentials, &guard_config.schedule);
    executor.run(guard_config.schedule.sweep_interval()).await?;

    info!("Shutting down daemon");
    Ok(())
}
