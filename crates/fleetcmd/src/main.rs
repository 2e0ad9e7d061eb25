//! fleetcmd CLI
//!
//! Fans a single command out across registered SSH hosts, tracks per-host
//! statistics, and records every executed command in a durable history.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::bail;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use fleetcmd_core::{FanOutCoordinator, FanOutReport, HostSelector, IntegrationSet};
use fleetcmd_exec::keys::EnvSecretStore;
use fleetcmd_exec::local::LocalExecutor;
use fleetcmd_exec::pool::ConnectionPool;
use fleetcmd_exec::ssh::SshConnector;
use fleetcmd_exec::traits::RemoteExecutor;
use fleetcmd_store::{
    AuthMethod, CommandKind, HistoryEntry, HistoryLog, Host, HostRegistry, OutcomeSummary,
};

mod config;
mod render;

use config::Config;

/// Exit code when any targeted host failed or timed out
const EXIT_HOST_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "fleetcmd")]
#[command(about = "Fan commands out across SSH hosts", long_about = None)]
struct Cli {
    /// Config file (defaults to $FLEETCMD_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage remote hosts and execute against them
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
    /// Run a command locally, recording it in history
    Run {
        /// Command to run through `sh -c`
        command: String,
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Inspect or prune the command history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Generate playbook artifacts from registered hosts
    Playbook {
        /// Integration to dispatch to (e.g. ansible)
        integration: String,
        /// Command the playbook should run
        command: String,
        /// Target host names
        #[arg(long = "host")]
        hosts: Vec<String>,
        /// Target hosts by tag instead
        #[arg(long)]
        tag: Option<String>,
    },
}

#[derive(Subcommand)]
enum RemoteCommands {
    /// Register a host
    Add {
        /// Unique host name
        name: String,
        /// Hostname or IP
        address: String,
        /// SSH user
        user: String,
        /// SSH port
        #[arg(long, default_value_t = 22)]
        port: u16,
        /// Private key file
        #[arg(long)]
        key: Option<PathBuf>,
        /// Secret store reference for key material
        #[arg(long, conflicts_with = "key")]
        secret: Option<String>,
        /// Tags for group selection (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Remove a host
    Remove {
        /// Host name
        name: String,
    },
    /// List hosts with their stats
    List {
        /// Only hosts carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Execute a command across hosts
    Exec {
        /// Command to run on every selected host
        command: String,
        /// Target host names (repeatable)
        #[arg(long = "host")]
        hosts: Vec<String>,
        /// Target hosts by tag instead
        #[arg(long)]
        tag: Option<String>,
        /// Per-host timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Overall fan-out deadline in seconds
        #[arg(long)]
        deadline: Option<u64>,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// Show history, newest first
    List {
        /// Maximum entries to show
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Drop all but the newest entries
    Prune {
        /// Entries to keep
        #[arg(long, default_value_t = 1000)]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    match cli.command {
        Commands::Remote { command } => remote(command, &config).await,
        Commands::Run { command, timeout } => run_local(&command, timeout, &config).await,
        Commands::History { command } => history(command).await,
        Commands::Playbook {
            integration,
            command,
            hosts,
            tag,
        } => playbook(&integration, &command, hosts, tag).await,
    }
}

async fn remote(command: RemoteCommands, config: &Config) -> Result<ExitCode> {
    let registry = Arc::new(HostRegistry::load_or_create(config::hosts_path()).await?);

    match command {
        RemoteCommands::Add {
            name,
            address,
            user,
            port,
            key,
            secret,
            tags,
        } => {
            let auth = match (key, secret) {
                (Some(path), _) => AuthMethod::KeyFile { path },
                (None, Some(reference)) => AuthMethod::Secret { reference },
                (None, None) => AuthMethod::Agent,
            };
            registry
                .add(
                    Host::new(&name, address, user)
                        .with_port(port)
                        .with_auth(auth)
                        .with_tags(tags),
                )
                .await?;
            println!("host {name} added");
            Ok(ExitCode::SUCCESS)
        }
        RemoteCommands::Remove { name } => {
            registry.remove(&name).await?;
            println!("host {name} removed");
            Ok(ExitCode::SUCCESS)
        }
        RemoteCommands::List { tag } => {
            let hosts = registry.list(tag.as_deref()).await;
            print!("{}", render::hosts_table(&hosts));
            Ok(ExitCode::SUCCESS)
        }
        RemoteCommands::Exec {
            command,
            hosts,
            tag,
            timeout,
            deadline,
        } => {
            let selector = selector(hosts, tag)?;
            let report = exec_fanout(registry, &command, &selector, timeout, deadline, config).await?;

            render::print_report(&report);
            append_fanout_history(&command, &report, config).await;

            if report.all_succeeded() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_HOST_FAILURE))
            }
        }
    }
}

fn selector(hosts: Vec<String>, tag: Option<String>) -> Result<HostSelector> {
    match (hosts.is_empty(), tag) {
        (false, None) => Ok(HostSelector::Names(hosts)),
        (true, Some(tag)) => Ok(HostSelector::Tag(tag)),
        (false, Some(_)) => bail!("pass either --host or --tag, not both"),
        (true, None) => bail!("select targets with --host or --tag"),
    }
}

async fn exec_fanout(
    registry: Arc<HostRegistry>,
    command: &str,
    selector: &HostSelector,
    timeout: Option<u64>,
    deadline: Option<u64>,
    config: &Config,
) -> Result<FanOutReport> {
    let connector = Arc::new(SshConnector::new(Arc::new(EnvSecretStore)));
    let pool = Arc::new(ConnectionPool::new(connector, config.pool_config()));
    pool.spawn_idle_reaper(Duration::from_secs(30));

    let coordinator = FanOutCoordinator::new(registry, pool.clone());
    let opts = config.fanout_options(timeout, deadline);

    // Ctrl-C cancels in-flight hosts; completed results are still reported
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling fan-out");
                cancel.cancel();
            }
        });
    }

    let report = coordinator.execute(command, selector, &opts, cancel).await?;
    pool.shutdown().await;
    Ok(report)
}

async fn append_fanout_history(command: &str, report: &FanOutReport, config: &Config) {
    let summary = report.summary();
    if summary.succeeded == 0 && !config.history.record_failed_fanout {
        return;
    }
    let kind = if report.results.len() == 1 {
        CommandKind::RemoteSingle
    } else {
        CommandKind::RemoteFanout
    };
    if let Err(e) = append_history(command, kind, summary).await {
        warn!(error = %e, "failed to append history entry");
    }
}

async fn run_local(command: &str, timeout: Option<u64>, config: &Config) -> Result<ExitCode> {
    let mut executor = LocalExecutor::new();
    let timeout = Duration::from_secs(timeout.unwrap_or(config.exec.command_timeout_secs));
    let output = executor.run(command, timeout).await;

    if !output.stdout.is_empty() {
        print!("{}", output.stdout);
    }
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    println!("({})", output.exit);

    let summary = OutcomeSummary {
        targets: 1,
        succeeded: u32::from(output.exit.success()),
        failed: u32::from(!output.exit.success()),
        cancelled: 0,
    };
    if let Err(e) = append_history(command, CommandKind::Local, summary).await {
        warn!(error = %e, "failed to append history entry");
    }

    match output.exit {
        fleetcmd_exec::ExitStatus::Exited(0) => Ok(ExitCode::SUCCESS),
        _ => Ok(ExitCode::from(EXIT_HOST_FAILURE)),
    }
}

async fn append_history(
    command: &str,
    kind: CommandKind,
    summary: OutcomeSummary,
) -> Result<()> {
    let log = HistoryLog::load_or_create(config::history_path()).await?;
    log.append(HistoryEntry {
        timestamp: Utc::now(),
        command: command.to_string(),
        kind,
        summary,
    })
    .await?;
    Ok(())
}

async fn history(command: HistoryCommands) -> Result<ExitCode> {
    let log = HistoryLog::load_or_create(config::history_path()).await?;
    match command {
        HistoryCommands::List { limit } => {
            let entries = log.list(limit, None).await;
            print!("{}", render::history_table(&entries));
        }
        HistoryCommands::Prune { keep } => {
            let removed = log.prune(keep).await?;
            println!("removed {removed} entries");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn playbook(
    integration: &str,
    command: &str,
    hosts: Vec<String>,
    tag: Option<String>,
) -> Result<ExitCode> {
    let registry = Arc::new(HostRegistry::load_or_create(config::hosts_path()).await?);

    let resolved = match selector(hosts, tag)? {
        HostSelector::Names(names) => {
            let mut resolved = Vec::with_capacity(names.len());
            for name in names {
                resolved.push(registry.get(&name).await?);
            }
            resolved
        }
        HostSelector::Tag(tag) => registry.list(Some(&tag)).await,
    };
    if resolved.is_empty() {
        bail!("selection matched no hosts");
    }

    let integrations = IntegrationSet::with_builtins();
    let generator = integrations.get(integration)?;
    let path = generator
        .generate(command, &resolved, &config::playbooks_dir())
        .await?;

    println!("generated {}", path.display());
    Ok(ExitCode::SUCCESS)
}
