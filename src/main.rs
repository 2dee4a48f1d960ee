use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lan_service_scan::config::{self, EngineConfig, ScanOptions};
use lan_service_scan::knowledge::NoKnowledge;
use lan_service_scan::orchestrator::{ScanOrchestrator, ScanSnapshot};
use lan_service_scan::ports::parse_ports_str;
use lan_service_scan::rules::CatalogScope;
use lan_service_scan::server;
use lan_service_scan::types::ServiceDetection;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// lan-service-scan: find self-hosted services on the local network.
#[derive(Debug, Parser)]
#[command(name = "lan-service-scan", version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. "info" or "lan_service_scan=debug". Falls back to RUST_LOG, then "info".
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan a range and print detected services.
    Scan(ScanArgs),
    /// Show how a range expands without scanning.
    Preview {
        /// Single IP, CIDR, start-end, or "auto".
        range: String,
    },
    /// Serve the scan API over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Single IP, CIDR, start-end, or "auto" (local networks).
    #[arg(default_value = "auto")]
    range: String,

    /// Per-probe timeout in milliseconds (1000-30000).
    #[arg(long = "timeout-ms", default_value_t = config::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Hosts probed in parallel.
    #[arg(long, default_value_t = config::DEFAULT_HOST_CONCURRENCY)]
    concurrency: usize,

    /// Ports probed in parallel per host.
    #[arg(long, default_value_t = config::DEFAULT_PORT_CONCURRENCY)]
    port_concurrency: usize,

    /// Also probe the extended list of common web ports.
    #[arg(long)]
    include_non_standard: bool,

    /// Skip the generic web fallback for unmatched ports.
    #[arg(long)]
    no_deep: bool,

    /// File with extra ports (one port or range per line, '#' comments).
    #[arg(long)]
    ports_file: Option<PathBuf>,

    /// Extra ports, e.g. "8096,9000-9002".
    #[arg(long)]
    extra_ports: Option<String>,

    /// Write the final scan snapshot as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Do not ask Docker for container hints.
    #[arg(long)]
    no_docker: bool,

    /// Try services registered on a port before the full catalogue.
    #[arg(long)]
    port_hint_first: bool,
}

impl EngineArgs {
    fn build(&self) -> Result<ScanOrchestrator> {
        let config = EngineConfig {
            catalog_scope: if self.port_hint_first {
                CatalogScope::PortHintFirst
            } else {
                CatalogScope::Full
            },
            load_external_knowledge: !self.no_docker,
            ..EngineConfig::default()
        };
        let mut builder = ScanOrchestrator::builder(config);
        if self.no_docker {
            builder = builder.knowledge_source(Arc::new(NoKnowledge));
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(match cli.log_level.as_deref() {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Scan(args) => run_scan(args).await,
        Command::Preview { range } => {
            let orch = ScanOrchestrator::builder(EngineConfig::default())
                .knowledge_source(Arc::new(NoKnowledge))
                .build()?;
            let preview = orch.test_range_parsing(&range)?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
            Ok(())
        }
        Command::Serve { bind, engine } => {
            let orch = engine.build()?;
            let shutdown = CancellationToken::new();
            let cleanup = orch.spawn_cleanup_task(shutdown.clone());
            let res = server::serve(bind, orch).await;
            shutdown.cancel();
            let _ = cleanup.await;
            res
        }
    }
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let mut extra_ports = Vec::new();
    if let Some(path) = args.ports_file.as_deref() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ports file {}", path.display()))?;
        extra_ports.extend(parse_ports_str(&text)?);
    }
    if let Some(list) = args.extra_ports.as_deref() {
        extra_ports.extend(parse_ports_str(list)?);
    }

    let options = ScanOptions {
        timeout: args.timeout_ms,
        concurrency: args.concurrency,
        port_concurrency: args.port_concurrency,
        include_non_standard: args.include_non_standard,
        deep_detection: !args.no_deep,
        extra_ports,
    };

    let orch = args.engine.build()?;
    let handle = orch.start_scan(&args.range, options).await?;
    eprintln!(
        "Scanning {} ({} hosts), Ctrl+C to cancel",
        handle.range_info.describe(),
        handle.total_hosts
    );

    let id = handle.scan_id;
    let mut last = None;
    let snapshot = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                orch.cancel_scan(id).await?;
                break orch.get_scan_status(id).await?;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let snap = orch.get_scan_status(id).await?;
                if last != Some(snap.progress) && snap.progress.total > 0 {
                    eprintln!(
                        "  {}/{} hosts ({}%), {} services",
                        snap.progress.current,
                        snap.progress.total,
                        snap.progress.percentage,
                        snap.results.len()
                    );
                    last = Some(snap.progress);
                }
                if snap.status.is_terminal() {
                    break snap;
                }
            }
        }
    };

    eprintln!("Scan {:?}", snapshot.status);
    if let Some(err) = &snapshot.error {
        eprintln!("  error: {err}");
    }
    print_results_table(&snapshot.results);
    if let Some(path) = args.output.as_deref() {
        match write_results_json(path, &snapshot) {
            Ok(()) => eprintln!("Wrote JSON results to {}", path.display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {e}", path.display()),
        }
    }
    Ok(())
}

fn print_results_table(results: &[ServiceDetection]) {
    if results.is_empty() {
        println!("No services detected.");
        return;
    }
    let ip_w = results
        .iter()
        .map(|r| r.ip.to_string().len())
        .max()
        .unwrap_or(0)
        .max("ip".len());
    let name_w = results
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max("service".len());
    let ver_w = results
        .iter()
        .filter_map(|r| r.version.as_ref().map(|v| v.len().min(20)))
        .max()
        .unwrap_or(0)
        .max("version".len());

    println!(
        "{:<ip_w$}  {:>5}  {:<name_w$}  {:>4}  {:<ver_w$}  url",
        "ip", "port", "service", "conf", "version"
    );
    println!(
        "{:-<ip_w$}  {:-<5}  {:-<name_w$}  {:-<4}  {:-<ver_w$}  {:-<3}",
        "", "", "", "", "", ""
    );
    for r in results {
        let version: String = r.version.as_deref().unwrap_or("").chars().take(20).collect();
        println!(
            "{:<ip_w$}  {:>5}  {:<name_w$}  {:>3}%  {:<ver_w$}  {}",
            r.ip, r.port, r.name, r.confidence, version, r.url
        );
    }
}

fn write_results_json(path: &Path, snapshot: &ScanSnapshot) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, snapshot)?;
    Ok(())
}
