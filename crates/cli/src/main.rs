// invsync CLI - reconcile inventory sources against the target registry

mod circuits;
mod exit_codes;
mod sources;
mod sync;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use invsync_client::{Credentials, Executor, RetryPolicy};
use invsync_config::{AuthMode, RetrySettings, Settings};

use exit_codes::{EXIT_CONFIG, EXIT_MISSING_CREDENTIALS, EXIT_SUCCESS, EXIT_USAGE};

pub const ENV_EMAIL: &str = "KENTIK_EMAIL";
pub const ENV_TOKEN: &str = "KENTIK_TOKEN";
pub const ENV_BEARER: &str = "KENTIK_API_TOKEN";
pub const ENV_NETBOX_URL: &str = "NETBOX_URL";
pub const ENV_NETBOX_TOKEN: &str = "NETBOX_TOKEN";

#[derive(Parser)]
#[command(name = "invsync")]
#[command(about = "Reconcile inventory sources against the target registry")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Config file (default: ./invsync.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Account email for email+token auth (or KENTIK_EMAIL)
    #[arg(long, global = true)]
    email: Option<String>,

    /// API token (or KENTIK_TOKEN / KENTIK_API_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the sync commands.
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Decide and report without issuing create/update calls
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Write the JSON run summary to a file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update devices from a CSV export
    #[command(after_help = "\
Columns: device_name, ip_address, site (required); role, lane, function, type (labels)

Examples:
  invsync devices devices.csv
  invsync devices devices.csv --dry-run --json
  invsync devices devices.csv --pause-ms 500 --output run.json")]
    Devices {
        /// CSV file with one device per row
        csv: PathBuf,

        /// Pause between records that issued writes
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Create or update interfaces from merged tag exports
    #[command(after_help = "\
Both files hold one JSON object per line with a \"tags\" map.

Examples:
  invsync interfaces interfaces.json ips.json
  invsync interfaces interfaces.json ips.json --dry-run")]
    Interfaces {
        /// Interface facts (device_name, device_id, ifindex, speed, type, description, ifDescr)
        interfaces: PathBuf,

        /// IP facts (device_name, ifindex, ip, netmask)
        ips: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Attach NetBox tenants to matching devices as labels
    #[command(after_help = "\
Examples:
  NETBOX_URL=https://netbox.example.com NETBOX_TOKEN=... invsync tenants
  invsync tenants --dry-run --json")]
    Tenants {
        /// NetBox base URL (or NETBOX_URL, or [netbox] base_url)
        #[arg(long)]
        netbox_url: Option<String>,

        /// NetBox API token (or NETBOX_TOKEN)
        #[arg(long)]
        netbox_token: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Find the interface carrying each circuit and write a cost import
    #[command(after_help = "\
Examples:
  invsync circuits circuits.csv interfaces.csv
  invsync circuits circuits.csv interfaces.csv --output matches.csv")]
    Circuits {
        /// Circuit export (circuit_id, circuit_name, site, connect_type, circuit_type,
        /// provider, price_per_mbps, commit_bandwidth, start_date, term, currency, mrc)
        circuits: PathBuf,

        /// Interface rows (device_id, interface_id, description, site)
        interfaces: PathBuf,

        /// Write the CSV here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Turn on flow and SNMP enrichment for every listed NMS device
    #[command(after_help = "\
Fills planId and the SNMP community from [defaults] where a device has none,
points the SNMP address at the first sending address and turns off
minimizeSnmp. Devices that already match are left alone.

Examples:
  KENTIK_API_TOKEN=... invsync nms-enrich --dry-run
  invsync nms-enrich --nms-url https://api.kentik.eu/api/v5 --pause-ms 100")]
    NmsEnrich {
        /// NMS API base URL (or [nms] base_url)
        #[arg(long)]
        nms_url: Option<String>,

        /// Pause between devices that were patched
        #[arg(long, default_value_t = 100)]
        pause_ms: u64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Look up a single device by id or name
    Lookup {
        name: String,

        /// Print the device as JSON
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .format_timestamp(None)
        .init();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { config, email, token, command, .. } = cli;
    let context = || -> Result<Context, CliError> {
        Ok(Context {
            settings: load_settings(config.as_deref())?,
            email: email.clone(),
            token: token.clone(),
        })
    };

    match command {
        Commands::Devices { csv, pause_ms, run } => {
            sync::cmd_devices(&context()?, &csv, Duration::from_millis(pause_ms), &run)
        }
        Commands::Interfaces { interfaces, ips, run } => {
            sync::cmd_interfaces(&context()?, &interfaces, &ips, &run)
        }
        Commands::Tenants { netbox_url, netbox_token, run } => {
            sync::cmd_tenants(&context()?, netbox_url, netbox_token, &run)
        }
        Commands::NmsEnrich { nms_url, pause_ms, run } => {
            sync::cmd_nms_enrich(&context()?, nms_url, Duration::from_millis(pause_ms), &run)
        }
        Commands::Lookup { name, json } => sync::cmd_lookup(&context()?, &name, json),
        // Offline: no settings or credentials needed.
        Commands::Circuits { circuits, interfaces, output } => {
            circuits::cmd_circuits(&circuits, &interfaces, output.as_deref())
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ── Settings & credentials ──────────────────────────────────────────

/// Settings plus the global credential flags, shared by every command.
pub struct Context {
    pub settings: Settings,
    pub email: Option<String>,
    pub token: Option<String>,
}

impl Context {
    /// Executor for the target API, authenticated per `[target] auth`.
    pub fn target_executor(&self) -> Result<Executor, CliError> {
        self.executor_at(&self.settings.target.base_url)
    }

    /// Target credentials against another API root of the same account.
    pub fn executor_at(&self, base_url: &str) -> Result<Executor, CliError> {
        let credentials = match self.settings.target.auth {
            AuthMode::EmailToken => Credentials::EmailToken {
                email: resolve_secret(self.email.clone(), "account email", "--email", ENV_EMAIL)?,
                token: resolve_secret(self.token.clone(), "API token", "--token", ENV_TOKEN)?,
            },
            AuthMode::Bearer => {
                Credentials::Bearer(resolve_secret(self.token.clone(), "API token", "--token", ENV_BEARER)?)
            }
        };
        Ok(Executor::new(base_url, credentials, retry_policy(&self.settings.retry)))
    }

    pub fn policy(&self) -> RetryPolicy {
        retry_policy(&self.settings.retry)
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    let mut settings = Settings::load(path).map_err(|e| CliError::new(EXIT_CONFIG, e.to_string()))?;
    settings
        .apply_env(|var| std::env::var(var).ok())
        .map_err(|e| CliError::new(EXIT_CONFIG, e.to_string()))?;
    log::debug!("target {}", settings.target.base_url);
    Ok(settings)
}

pub fn retry_policy(retry: &RetrySettings) -> RetryPolicy {
    RetryPolicy {
        max_retries: retry.max_retries,
        time_unit: Duration::from_millis(retry.time_unit_ms.max(1)),
        rate_limit_fallback: retry.rate_limit_fallback_secs,
        low_water_mark: retry.low_water_mark,
        throttle_pause: retry.throttle_secs,
        timeout: Duration::from_secs(retry.timeout_secs),
    }
}

/// Resolve a secret: flag value > environment variable > error.
pub fn resolve_secret(
    flag: Option<String>,
    what: &str,
    flag_name: &str,
    env_var: &str,
) -> Result<String, CliError> {
    let missing = || {
        CliError::new(
            EXIT_MISSING_CREDENTIALS,
            format!("missing {} (use {} or set {})", what, flag_name, env_var),
        )
    };

    if let Some(value) = flag {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            return Err(missing());
        }
        return Ok(trimmed);
    }

    if let Ok(value) = std::env::var(env_var) {
        let trimmed = value.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }

    Err(missing())
}
