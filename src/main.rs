use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dataplane_client::cloud::{
    ClientOptions, DataPlaneClient, DataPlaneRequester, StaticTokenCredential,
};
use dataplane_client::config::Config;
use dataplane_client::{ResourceId, RetryPolicy};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Environment variable holding the bearer token
const TOKEN_ENV: &str = "DPCTL_ACCESS_TOKEN";

/// Issue data-plane requests against any cloud resource endpoint
#[derive(Parser, Debug)]
#[command(name = "dpctl", version = dataplane_client::VERSION, about, long_about = None)]
struct Args {
    /// Cloud environment (public, usgovernment, china)
    #[arg(short, long)]
    environment: Option<String>,

    /// Bearer token to send
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Regex matched against error messages; matching errors are retried
    #[arg(long = "retry-on")]
    retry_on: Vec<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a resource
    Get(Target),
    /// Create or update a resource, waiting for completion
    Put {
        #[command(flatten)]
        target: Target,
        /// JSON or YAML file with the request body
        #[arg(long)]
        body: PathBuf,
    },
    /// Delete a resource, waiting for completion
    Delete(Target),
    /// Invoke a custom action on a resource
    Action {
        #[command(flatten)]
        target: Target,
        /// Path appended to the resource, e.g. `listKeys`
        #[arg(long, default_value = "")]
        action: String,
        /// HTTP method
        #[arg(long, default_value = "POST")]
        method: String,
        /// JSON or YAML file with the request body
        #[arg(long)]
        body: Option<PathBuf>,
    },
    /// Show or persist the default cloud environment
    Env {
        /// Environment to save as the default
        name: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Host and path of the resource, e.g. myvault.vault.azure.net/secrets/db
    cloud_path: String,

    /// API version sent as `api-version`
    #[arg(long)]
    api_version: String,
}

impl Target {
    fn resource_id(&self) -> Result<ResourceId> {
        ResourceId::new(&self.cloud_path, &self.api_version).context("Invalid resource id")
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("dpctl started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("dpctl").join("dpctl.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".dpctl").join("dpctl.log");
    }
    PathBuf::from("dpctl.log")
}

/// Read a request body; `.yaml`/`.yml` files are parsed as YAML, anything else as JSON
fn read_body(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read body file {:?}", path))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {:?}", path))
    } else {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
    }
}

fn build_requester(args: &Args) -> Result<Arc<dyn DataPlaneRequester>> {
    let mut config = Config::load();
    if let Some(environment) = &args.environment {
        config.environment = Some(environment.clone());
    }
    if !args.retry_on.is_empty() {
        config.retry.error_patterns = args.retry_on.clone();
    }

    let token = args
        .token
        .clone()
        .with_context(|| format!("No access token: pass --token or set {}", TOKEN_ENV))?;
    let credential = Arc::new(StaticTokenCredential::new(token));
    let mut options = ClientOptions::new(credential)
        .with_cloud(config.cloud()?)
        .with_transport(config.transport.clone())
        .with_poll_frequency(config.poll_frequency());
    if let Some(app) = &config.application_id {
        options = options.with_application_id(app);
    }

    let client = Arc::new(DataPlaneClient::new(options).context("Failed to create client")?);
    let policy: Option<RetryPolicy> = config.retry_policy()?;

    let requester: Arc<dyn DataPlaneRequester> = match policy {
        Some(policy) => Arc::new(client.with_retry(policy)),
        None => client,
    };
    Ok(requester)
}

/// Print the effective environment, saving `name` as the default first
fn show_environment(name: Option<&str>) -> Result<Option<Value>> {
    let mut config = Config::load();
    if let Some(name) = name {
        config.set_environment(name)?;
        tracing::info!("Default environment set to {}", name);
    }
    let cloud = config.cloud()?;
    Ok(Some(serde_json::json!({
        "environment": config.effective_environment(),
        "services": cloud.services,
    })))
}

async fn run(args: Args, cancel: CancellationToken) -> Result<Option<Value>> {
    let result = match &args.command {
        Command::Env { name } => return show_environment(name.as_deref()),
        Command::Get(target) => {
            build_requester(&args)?
                .get(&target.resource_id()?, &cancel)
                .await
        }
        Command::Put { target, body } => {
            let body = read_body(body)?;
            build_requester(&args)?
                .create_or_update(&target.resource_id()?, &body, &cancel)
                .await
        }
        Command::Delete(target) => {
            build_requester(&args)?
                .delete(&target.resource_id()?, &cancel)
                .await
        }
        Command::Action {
            target,
            action,
            method,
            body,
        } => {
            let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method {}", method))?;
            let body = body.as_deref().map(read_body).transpose()?;
            build_requester(&args)?
                .action(&target.resource_id()?, action, method, body.as_ref(), &cancel)
                .await
        }
    };

    Ok(result?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match run(args, cancel).await? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => tracing::debug!("Operation returned no payload"),
    }

    Ok(())
}
