//! domaind — the domain operator daemon.
//!
//! Reconciles the domains of a TOML manifest against a simulated cluster
//! and persists their status in a redb store.
//!
//! # Usage
//!
//! ```text
//! domaind run --domains domains.toml --config operator.toml --data-dir /var/lib/domaind
//! domaind reconcile --domains domains.toml
//! domaind status ns1/domain1 --history
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use domainop_calls::{MemoryCluster, ReadyMode};
use domainop_core::OperatorConfig;
use domainop_fiber::CancelToken;
use domainop_presence::Reconciler;
use domainop_state::StatusStore;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod manifest;
mod operator;

use manifest::DomainManifest;
use operator::{RecheckLoop, recheck, seed_namespaces};

const DEFAULT_FILTER: &str = "info,domaind=debug,domainop=debug";
const STORE_FILE: &str = "domaind.redb";

#[derive(Parser)]
#[command(name = "domaind", about = "Domain operator daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ClusterArgs {
    /// Domain manifest (TOML).
    #[arg(long, default_value = "domains.toml")]
    domains: PathBuf,

    /// Operator configuration (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the status store.
    #[arg(long, default_value = "/var/lib/domaind")]
    data_dir: PathBuf,

    /// How long a simulated server takes to become ready, in milliseconds.
    #[arg(long, default_value = "200")]
    ready_delay_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every managed domain periodically until Ctrl-C.
    Run {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
    /// Reconcile every managed domain once and print the outcomes.
    Reconcile {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
    /// Print persisted domain status as JSON.
    Status {
        /// `{namespace}/{name}` of one domain; all domains when omitted.
        domain: Option<String>,

        /// Print the domain's outcome history instead of its status.
        #[arg(long, requires = "domain")]
        history: bool,

        #[arg(long, default_value = "/var/lib/domaind")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Run { cluster } => run(cluster).await,
        Command::Reconcile { cluster } => reconcile_once(cluster).await,
        Command::Status {
            domain,
            history,
            data_dir,
        } => print_status(&data_dir, domain.as_deref(), history),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Everything one process needs: config, manifest, and a reconciler wired
/// to the simulated cluster and the status store.
struct Assembled {
    config: OperatorConfig,
    manifest: DomainManifest,
    cluster: MemoryCluster,
    reconciler: Arc<Reconciler>,
}

fn assemble(args: &ClusterArgs) -> anyhow::Result<Assembled> {
    let config = match &args.config {
        Some(path) => OperatorConfig::from_file(path)
            .with_context(|| format!("loading operator config {}", path.display()))?,
        None => OperatorConfig::default(),
    };
    let manifest = DomainManifest::from_file(&args.domains)?;

    let cluster = MemoryCluster::new()
        .with_ready_mode(ReadyMode::After(Duration::from_millis(args.ready_delay_ms)));
    seed_namespaces(&cluster, &manifest.namespaces());
    info!(
        domains = manifest.domains.len(),
        namespaces = manifest.namespaces().len(),
        "simulated cluster ready"
    );

    std::fs::create_dir_all(&args.data_dir)?;
    let db_path = args.data_dir.join(STORE_FILE);
    let store = StatusStore::open(&db_path)?;
    info!(path = ?db_path, "status store opened");

    let reconciler =
        Reconciler::new(cluster.api(), config.clone()).with_status_writer(Arc::new(store));
    Ok(Assembled {
        config,
        manifest,
        cluster,
        reconciler: Arc::new(reconciler),
    })
}

async fn run(args: ClusterArgs) -> anyhow::Result<()> {
    info!("domain operator starting");
    let Assembled {
        config,
        cluster,
        reconciler,
        ..
    } = assemble(&args)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    RecheckLoop {
        reconciler,
        manifest_path: args.domains,
        interval: config.recheck_interval(),
        cluster: Some(cluster),
    }
    .run(shutdown_rx)
    .await;

    info!("domain operator stopped");
    Ok(())
}

async fn reconcile_once(args: ClusterArgs) -> anyhow::Result<()> {
    let Assembled {
        manifest,
        reconciler,
        ..
    } = assemble(&args)?;
    let reports = recheck(&reconciler, &manifest.domains, &CancelToken::new()).await?;
    for report in &reports {
        println!("{:<32} {}", report.domain_key, report.outcome);
        for failure in &report.failures {
            println!(
                "  {} {}",
                failure.subject.as_deref().unwrap_or("-"),
                failure.message
            );
        }
    }
    Ok(())
}

fn print_status(data_dir: &Path, domain: Option<&str>, history: bool) -> anyhow::Result<()> {
    let store = StatusStore::open(&data_dir.join(STORE_FILE))?;
    let rendered = match domain {
        Some(key) if history => serde_json::to_string_pretty(&store.list_outcomes(key)?)?,
        Some(key) => match store.get_status(key)? {
            Some(record) => serde_json::to_string_pretty(&record)?,
            None => anyhow::bail!("no status recorded for {key}"),
        },
        None => serde_json::to_string_pretty(&store.list_statuses()?)?,
    };
    println!("{rendered}");
    Ok(())
}
