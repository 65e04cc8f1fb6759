//! slowlog - slow-log telemetry exporter and threshold tool for clustered databases.
//!
//! `telemetry` polls the slow-log length of every selected database, either
//! once (printing samples as JSON lines) or continuously with `--server`,
//! exposing the latest values on `/metrics`. `config` reads or sets the
//! slow-log thresholds of the selected databases.

mod background;
mod server;

use std::error::Error;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use slowlog_core::cluster::{ClusterConfig, Directory, RestClient};
use slowlog_core::filter::DatabaseFilter;
use slowlog_core::model::RawEntry;
use slowlog_core::registry::MetricRegistry;
use slowlog_core::telemetry::TelemetryPoller;
use slowlog_core::thresholds::{ThresholdChange, apply_thresholds, read_thresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Publish slowlog telemetry.
    Telemetry,
    /// Read or set slowlog thresholds.
    Config,
}

/// Sets slowlog config or publishes slowlog telemetry.
#[derive(Parser, Debug)]
#[command(name = "slowlog", version = slowlog_core::VERSION)]
struct Args {
    /// The action to perform.
    #[arg(value_enum)]
    action: Action,

    /// Cluster endpoint host. Should not include scheme or port.
    #[arg(env = "SLOWLOG_ENDPOINT")]
    endpoint: String,

    /// Cluster username.
    #[arg(env = "SLOWLOG_USERNAME")]
    username: String,

    /// Cluster password.
    #[arg(env = "SLOWLOG_PASSWORD", hide_env_values = true)]
    password: String,

    /// Database name or id to run the action against. Can be given more than once.
    #[arg(long = "db", value_name = "NAME_OR_ID", env = "SLOWLOG_DB", value_delimiter = ',')]
    db: Vec<String>,

    /// Set slowlog-log-slower-than (microseconds). Switches `config` to write mode.
    #[arg(long)]
    slower_than: Option<i64>,

    /// Set slowlog-max-len. Switches `config` to write mode.
    #[arg(long)]
    max_len: Option<i64>,

    /// Run in server mode. Only applies to `telemetry`.
    #[arg(long)]
    server: bool,

    /// Port to serve /metrics on.
    #[arg(long, default_value = "8000", env = "SLOWLOG_SERVER_PORT",
        value_parser = clap::value_parser!(u16).range(1..))]
    server_port: u16,

    /// How often to poll slowlogs in server mode, in seconds.
    #[arg(long, default_value = "5", env = "SLOWLOG_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Do not verify the cluster's TLS certificate.
    #[arg(long)]
    noverify: bool,

    /// Port of the cluster REST API.
    #[arg(long, default_value_t = ClusterConfig::DEFAULT_API_PORT, env = "SLOWLOG_API_PORT")]
    api_port: u16,

    /// Per-request timeout towards the cluster, in seconds.
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Drop series of databases that disappear or stop matching --db.
    /// By default their last value stays exposed until restart.
    #[arg(long)]
    purge_stale: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn filter(&self) -> DatabaseFilter {
        DatabaseFilter::new(self.db.iter().cloned())
    }

    fn threshold_change(&self) -> ThresholdChange {
        ThresholdChange {
            slower_than: self.slower_than,
            max_len: self.max_len,
        }
    }

    fn cluster_config(&self) -> Result<ClusterConfig, String> {
        if self.endpoint.trim().is_empty() {
            return Err("cluster endpoint is empty".to_string());
        }
        if self.endpoint.contains("://") {
            return Err(format!(
                "cluster endpoint '{}' must not include a scheme",
                self.endpoint
            ));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err("cluster username and password are required".to_string());
        }
        let mut config = ClusterConfig::new(self.endpoint.trim(), &self.username, &self.password);
        config.api_port = self.api_port;
        config.verify_tls = !self.noverify;
        config.timeout = Duration::from_secs(self.timeout);
        Ok(config)
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["slowlog", "slowlog_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match args.cluster_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    };

    // Built outside any async runtime; `main` keeps a reference so the
    // client is finally dropped outside of it as well.
    let client = match RestClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "failed to create cluster client");
            process::exit(1);
        }
    };

    let result = match args.action {
        Action::Config => run_config(&args, client.as_ref()),
        Action::Telemetry if args.server => run_server(&args, client.clone()),
        Action::Telemetry => run_oneshot(&args, client.clone()),
    };

    if let Err(e) = result {
        error!(error = %e, "slowlog failed");
        process::exit(1);
    }
}

fn run_oneshot(args: &Args, client: Arc<RestClient>) -> Result<(), Box<dyn Error>> {
    client.list_databases()?;
    let poller = TelemetryPoller::new(client, args.filter());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = poller.run_cycle(|source, metric| {
        let entry = RawEntry {
            source: source.clone(),
            metric: metric.clone(),
        };
        match serde_json::to_string(&entry) {
            Ok(line) => {
                if let Err(e) = writeln!(out, "{}", line) {
                    warn!(error = %e, "failed to write sample");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode sample"),
        }
    });
    out.flush()?;

    info!(
        samples = result.samples,
        unrecognized = result.unrecognized,
        errors = result.errors,
        duration_ms = result.duration.as_millis() as u64,
        "poll complete"
    );
    Ok(())
}

fn run_server(args: &Args, client: Arc<RestClient>) -> Result<(), Box<dyn Error>> {
    let filter = args.filter();
    let databases = client.list_databases()?;
    info!(
        cluster = client.cluster(),
        databases = databases.len(),
        monitored = databases.iter().filter(|db| filter.include(db)).count(),
        "cluster reachable"
    );

    let registry = Arc::new(MetricRegistry::new());
    let poller = TelemetryPoller::new(client, filter)
        .with_registry(registry.clone())
        .purge_stale(args.purge_stale);
    let interval = Duration::from_secs(args.interval);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.server_port));
    info!(interval_s = args.interval, %addr, "starting server mode");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let served = runtime.block_on(async move {
        let polling = background::start(interval, registry.clone(), move || {
            poller.run_cycle(|_, _| {})
        });
        let served = server::serve(addr, registry, shutdown_signal()).await;
        polling.abort();
        served
    });
    runtime.shutdown_timeout(Duration::from_secs(5));

    served?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

fn run_config(args: &Args, client: &RestClient) -> Result<(), Box<dyn Error>> {
    let filter = args.filter();
    let change = args.threshold_change();

    let outcome = if change.is_empty() {
        let outcome = read_thresholds(client, &filter)?;
        for report in &outcome.reports {
            println!(
                "Name: {} Slower than: {} Max length: {}",
                report.name, report.thresholds.slower_than, report.thresholds.max_len
            );
        }
        outcome
    } else {
        apply_thresholds(client, &filter, change)?
    };

    if outcome.failures.is_empty() {
        Ok(())
    } else {
        Err(format!("{} database operation(s) failed", outcome.failures.len()).into())
    }
}
