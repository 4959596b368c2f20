//! rootcache server
//!
//! Serves the DNS root zone from a local, periodically refreshed copy.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use hickory_proto::rr::{Record, RecordType};
use rootcache::settings::{self, Overrides};
use rootcache::{bootstrap, RootHandler};
use rootcache_config::Config;
use rootcache_metrics::prometheus::{init_prometheus, PrometheusConfig};
use rootcache_metrics::tracing_setup::init_tracing;
use rootcache_server::DnsServer;
use rootcache_sync::{Manager, ManagerState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// rootcache - a caching authoritative server for the DNS root zone
#[derive(Parser, Debug)]
#[command(name = "rootcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE", env = "ROOTCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Sync method: transfer (axfr) or bulk-download (http)
    #[arg(long, global = true, value_name = "METHOD")]
    sync_method: Option<String>,

    /// Preferred upstream: host:port for transfer, URL for bulk download
    #[arg(long, global = true, value_name = "UPSTREAM")]
    upstream: Option<String>,

    /// Snapshot file used for persistence and warm starts
    #[arg(long, global = true, value_name = "FILE")]
    zone_file: Option<PathBuf>,

    /// Listen address for both UDP and TCP
    #[arg(long, global = true, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Seconds between zone refreshes (minimum 30)
    #[arg(long, global = true, value_name = "SECS")]
    refresh_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            sync_method: self.sync_method.clone(),
            upstream: self.upstream.clone(),
            zone_file: self.zone_file.clone(),
            listen: self.listen,
            refresh_secs: self.refresh_secs,
            log_level: self.log_level.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    /// Start the DNS server (default)
    Run,

    /// Download the zone once, write the snapshot file and exit
    Sync,

    /// Answer a query from the snapshot file without the network
    Lookup {
        /// Domain name to look up
        name: String,

        /// Record type
        #[arg(default_value = "NS")]
        rtype: String,
    },

    /// Validate configuration file
    Validate {
        /// Show detailed validation output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show version information
    Version {
        /// Show detailed version info
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Find the configuration file in standard locations
fn find_config_file(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path);
    }

    let mut search_paths = vec![
        PathBuf::from("./rootcache.yaml"),
        PathBuf::from("./rootcache.yml"),
        PathBuf::from("./config.yaml"),
        PathBuf::from("/etc/rootcache/config.yaml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        search_paths.push(dir.join("rootcache/config.yaml"));
    }

    search_paths.into_iter().find(|path| path.exists())
}

/// Loads the configuration file (or defaults), applies CLI overrides and validates.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match find_config_file(cli.config.clone()) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            if !cli.quiet {
                eprintln!(
                    "{}",
                    style("No configuration file found, using defaults").yellow()
                );
            }
            Config::default()
        }
    };

    cli.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize logging/tracing subsystem
fn init_logging(config: &Config, quiet: bool) {
    let log_config = settings::log_config(&config.logging, quiet);
    if let Err(e) = init_tracing(&log_config) {
        eprintln!("{} {e}", style("Failed to initialize logging:").red());
    }
}

fn build_manager(config: &Config) -> Result<Arc<Manager>> {
    let manager =
        Manager::new(settings::manager_config(&config.sync)).context("Invalid sync configuration")?;
    Ok(Arc::new(manager))
}

/// Print the startup banner
fn print_banner(config: &Config, quiet: bool) {
    if quiet {
        return;
    }

    let version = env!("CARGO_PKG_VERSION");

    println!();
    println!(
        "  {} {}",
        style("rootcache").cyan().bold(),
        style(format!("v{version}")).dim()
    );
    println!("  {}", style("Caching authoritative root zone server").dim());
    println!();

    println!("  {} {}", style("Server:").green(), config.server.name);

    let mut listeners = Vec::new();
    if !config.listeners.udp.is_empty() {
        listeners.push(format!("UDP({})", config.listeners.udp.len()));
    }
    if !config.listeners.tcp.is_empty() {
        listeners.push(format!("TCP({})", config.listeners.tcp.len()));
    }
    println!("  {} {}", style("Listeners:").green(), listeners.join(", "));

    let upstream = config.sync.upstream.as_deref().unwrap_or("built-in");
    println!(
        "  {} {} via {}, every {}s",
        style("Sync:").green(),
        config.sync.method,
        upstream,
        config.sync.refresh_interval_secs
    );
    println!(
        "  {} {}",
        style("Snapshot:").green(),
        config.sync.snapshot_file.display()
    );

    println!();
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Received SIGINT, initiating graceful shutdown..."),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

async fn run_server(config: Config, quiet: bool) -> Result<()> {
    print_banner(&config, quiet);

    if config.metrics.enabled && config.metrics.prometheus.enabled {
        let prom_config = PrometheusConfig {
            listen: config.metrics.prometheus.listen,
        };
        if let Err(e) = init_prometheus(&prom_config) {
            warn!(error = %e, "Failed to initialize Prometheus metrics");
        }
    }

    let manager = build_manager(&config)?;
    if bootstrap(&manager).await == ManagerState::Uninitialized {
        warn!("Starting without zone data");
    }

    let refresh = manager.spawn_refresh();
    info!(
        interval_secs = manager.refresh_interval().as_secs(),
        method = %manager.method(),
        "Zone refresh scheduled"
    );

    let handler = Arc::new(RootHandler::new(Arc::clone(&manager)));
    let server = DnsServer::new(settings::server_config(&config.listeners), handler);

    info!(name = %config.server.name, "rootcache started");

    let outcome = tokio::select! {
        result = server.run() => result,
        () = shutdown_signal() => Ok(()),
    };

    server.shutdown();
    refresh.stop().await;

    outcome.context("DNS server failed")?;
    let stats = rootcache_metrics::metrics();
    info!(
        uptime_secs = stats.uptime().as_secs(),
        queries = stats.queries(),
        syncs = stats.syncs(),
        "rootcache stopped"
    );
    Ok(())
}

/// One-shot download and persist.
async fn run_sync(config: Config, quiet: bool) -> Result<()> {
    let manager = build_manager(&config)?;
    let report = manager.sync().await.context("Zone sync failed")?;

    if !report.persisted {
        bail!(
            "Zone downloaded but the snapshot could not be written to {}",
            manager.snapshot_path().display()
        );
    }

    if !quiet {
        println!(
            "{} {} records, {} delegations written to {}",
            style("Synced:").green().bold(),
            report.records,
            report.delegations,
            manager.snapshot_path().display()
        );
    }
    Ok(())
}

fn print_section(title: &str, records: &[Record]) {
    println!("{}", style(format!(";; {title} SECTION:")).bold());
    for record in records {
        println!("{record}");
    }
    println!();
}

/// Answers one query from the snapshot file.
async fn lookup(config: Config, name: &str, rtype: &str) -> Result<()> {
    let qname = rootcache_zone::canonical_name(name)
        .with_context(|| format!("Invalid domain name {name:?}"))?;
    let qtype = RecordType::from_str(&rtype.to_ascii_uppercase())
        .with_context(|| format!("Unknown record type {rtype:?}"))?;

    let manager = build_manager(&config)?;
    manager.sync_from_file().await.with_context(|| {
        format!(
            "Failed to load snapshot from {}",
            manager.snapshot_path().display()
        )
    })?;

    let reply = manager.handle_query(&qname, qtype, false);

    println!(
        ";; {} {} {}, status: {}, aa: {}",
        style("QUESTION").bold(),
        qname,
        qtype,
        reply.rcode,
        reply.response.authoritative
    );
    println!();
    print_section("ANSWER", &reply.response.answer);
    print_section("AUTHORITY", &reply.response.authority);
    print_section("ADDITIONAL", &reply.response.additional);
    Ok(())
}

/// Validate configuration file
fn validate_config(cli: &Cli, verbose: bool) -> Result<()> {
    let config_path = find_config_file(cli.config.clone()).context("No configuration file found")?;

    println!("Validating configuration: {}", config_path.display());

    let mut config = Config::from_file(&config_path).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            config_path.display()
        )
    })?;
    cli.overrides().apply(&mut config);

    if verbose {
        println!("\n{}", style("Configuration loaded:").green().bold());
        println!("  Server name: {}", config.server.name);
        println!("  UDP listeners: {}", config.listeners.udp.len());
        println!("  TCP listeners: {}", config.listeners.tcp.len());
        println!("  Sync method: {}", config.sync.method);
        println!(
            "  Upstream: {}",
            config.sync.upstream.as_deref().unwrap_or("built-in")
        );
        println!("  Snapshot file: {}", config.sync.snapshot_file.display());
        println!("  Refresh interval: {}s", config.sync.refresh_interval_secs);
        println!("  Metrics enabled: {}", config.metrics.enabled);

        let yaml = config
            .to_yaml()
            .context("Failed to render configuration")?;
        println!("\n{}", style("Effective configuration:").green().bold());
        print!("{yaml}");
    }

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    build_manager(&config)?;

    println!("{}", style("Configuration is valid!").green().bold());
    Ok(())
}

/// Print version information
fn print_version(verbose: bool) {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");

    if verbose {
        println!(
            "{} {}",
            style(name).cyan().bold(),
            style(format!("v{version}")).dim()
        );
        println!();
        println!(
            "  {}: {}",
            style("Build target").dim(),
            std::env::consts::ARCH
        );
        println!("  {}: {}", style("OS").dim(), std::env::consts::OS);
        println!();
    } else {
        println!("{name} {version}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Version { verbose } => {
            print_version(verbose);
            Ok(())
        }
        Commands::Validate { verbose } => validate_config(&cli, verbose),
        Commands::Run => {
            let config = load_config(&cli)?;
            init_logging(&config, cli.quiet);
            run_server(config, cli.quiet).await
        }
        Commands::Sync => {
            let config = load_config(&cli)?;
            init_logging(&config, cli.quiet);
            run_sync(config, cli.quiet).await
        }
        Commands::Lookup { name, rtype } => {
            let config = load_config(&cli)?;
            init_logging(&config, true);
            lookup(config, &name, &rtype).await
        }
    }
}
