//! clusterboot CLI

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use clusterboot::{
    observability::{init_tracing, TracingConfig},
    reconciler::exit_code,
    version, AdminClient, CancelSignal, InMemoryAdminClient, MongoShellClient, MongoShellConfig,
    ReconcilerConfig, Reconciler, Report, Topology,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "clusterboot")]
#[command(about = "Bootstrap a sharded database cluster from a topology descriptor")]
#[command(version = version::VERSION)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Router connection string
    #[arg(
        long,
        global = true,
        env = "CLUSTERBOOT_ROUTER",
        default_value = "mongodb://localhost:27017"
    )]
    router: String,

    /// Path to the mongosh binary
    #[arg(long, global = true, env = "CLUSTERBOOT_MONGOSH", default_value = "mongosh")]
    mongosh: PathBuf,

    /// Run against an in-memory simulated cluster instead of a live one
    #[arg(long, global = true)]
    simulate: bool,

    /// Also write the JSON report to this file
    #[arg(long, global = true)]
    report_file: Option<PathBuf>,

    /// Stop the whole run after this many seconds
    #[arg(long, global = true, env = "CLUSTERBOOT_RUN_DEADLINE_SECS")]
    deadline_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the cluster toward the topology
    Apply {
        /// Topology descriptor (YAML or JSON)
        #[arg(long, short, env = "CLUSTERBOOT_TOPOLOGY")]
        topology: PathBuf,
    },
    /// Show what `apply` would do, without changing anything
    Plan {
        #[arg(long, short, env = "CLUSTERBOOT_TOPOLOGY")]
        topology: PathBuf,
    },
    /// Check a topology descriptor without contacting the cluster
    Validate {
        #[arg(long, short, env = "CLUSTERBOOT_TOPOLOGY")]
        topology: PathBuf,
    },
    /// Print build information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::from_env()) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run(cli).await {
        Ok(code) => exit_status(code),
        Err(e) => {
            error!("clusterboot failed: {e:#}");
            exit_status(exit_code::INTERNAL)
        }
    }
}

fn exit_status(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let global = cli.global;

    match cli.command {
        Commands::Version => {
            println!("{}", version::build_info());
            Ok(exit_code::CONVERGED)
        }
        Commands::Validate { topology } => {
            let Some(topology) = load_topology(&topology) else {
                return Ok(exit_code::VALIDATION);
            };
            match topology.validate() {
                Ok(()) => {
                    info!("Topology is valid");
                    emit(&global, &serde_json::json!({ "valid": true, "issues": [] }))?;
                    Ok(exit_code::CONVERGED)
                }
                Err(issues) => {
                    for issue in &issues {
                        warn!(issue = %issue, "Invalid topology");
                    }
                    emit(&global, &serde_json::json!({ "valid": false, "issues": issues }))?;
                    Ok(exit_code::VALIDATION)
                }
            }
        }
        Commands::Plan { topology } => {
            let Some(topology) = load_topology(&topology) else {
                return Ok(exit_code::VALIDATION);
            };
            let reconciler = build_reconciler(&global, &topology);
            match reconciler.plan(&topology, install_cancel_handler()).await {
                Ok(plan) => {
                    emit(&global, &plan)?;
                    Ok(exit_code::CONVERGED)
                }
                Err(e) => {
                    error!(class = e.class(), error = %e, "Could not build a plan");
                    Ok(e.exit_code())
                }
            }
        }
        Commands::Apply { topology } => {
            let Some(topology) = load_topology(&topology) else {
                return Ok(exit_code::VALIDATION);
            };
            let reconciler = build_reconciler(&global, &topology);
            info!(
                version = %version::full_version(),
                simulate = global.simulate,
                router = %global.router,
                "Starting clusterboot"
            );

            match reconciler.reconcile(&topology, install_cancel_handler()).await {
                Ok(report) => {
                    emit_report(&global, &report)?;
                    Ok(exit_code::CONVERGED)
                }
                Err(failure) => {
                    error!(
                        class = failure.error.class(),
                        error = %failure.error,
                        "Bootstrap failed"
                    );
                    emit_report(&global, &failure.report)?;
                    Ok(failure.exit_code())
                }
            }
        }
    }
}

fn load_topology(path: &Path) -> Option<Topology> {
    match Topology::from_path(path) {
        Ok(topology) => Some(topology),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to load topology");
            None
        }
    }
}

fn build_reconciler(global: &GlobalArgs, topology: &Topology) -> Reconciler {
    let mut config = ReconcilerConfig::from_env();
    if let Some(secs) = global.deadline_secs {
        config.run_deadline = Some(Duration::from_secs(secs));
    }

    let admin: Arc<dyn AdminClient> = if global.simulate {
        info!(replica_sets = topology.replica_sets.len(), "Using simulated cluster");
        Arc::new(InMemoryAdminClient::new())
    } else {
        let shell = MongoShellConfig {
            binary: global.mongosh.clone(),
            router_uri: global.router.clone(),
            ..MongoShellConfig::from_env()
        };
        Arc::new(MongoShellClient::new(shell))
    };

    Reconciler::new(admin, config)
}

/// Cancel the run on ctrl-c; in-flight calls still finish.
fn install_cancel_handler() -> CancelSignal {
    let (handle, signal) = CancelSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current call");
            handle.cancel();
        }
    });
    signal
}

fn emit_report(global: &GlobalArgs, report: &Report) -> anyhow::Result<()> {
    info!(
        run_id = %report.run_id,
        applied = report.summary.applied,
        skipped = report.summary.skipped,
        failed = report.summary.failed,
        not_attempted = report.summary.not_attempted,
        "Run report"
    );
    emit(global, report)
}

/// Print `value` as JSON on stdout, and to `--report-file` when set.
fn emit<T: Serialize>(global: &GlobalArgs, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");

    if let Some(path) = &global.report_file {
        std::fs::write(path, format!("{json}\n"))
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }
    Ok(())
}
