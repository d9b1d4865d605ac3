//! FleetCP - transfer orchestration between heterogeneous hosts
//!
//! Drives copies and moves between the control host, Linux servers,
//! Windows servers, and NAS boxes by delegating to the native tools on
//! each side (rsync over SSH, cp/mv, copy/xcopy, PowerShell).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use fleetcp_config::{Config, ConfigLoader};
use fleetcp_engine::{TransferEngine, TransferEvent, TransferRequest};
use fleetcp_types::{FileItem, TerminalStatus, TransferIntent};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;

/// FleetCP - transfer orchestration between heterogeneous hosts
#[derive(Parser)]
#[command(
    name = "fleetcp",
    version = env!("CARGO_PKG_VERSION"),
    about = "Transfer orchestration between heterogeneous hosts",
    long_about = "FleetCP moves files between the control host, Linux, Windows, and NAS\n\
                  servers by driving the native copy tools on each side. It pools SSH\n\
                  connections, batches or parallelizes transfers, and reports progress."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy items to another host
    Copy {
        /// Source host name or address
        source_host: String,
        /// Source paths
        #[arg(required = true)]
        paths: Vec<String>,
        /// Target host name or address
        #[arg(long)]
        to: String,
        /// Destination directory on the target host
        #[arg(long)]
        dest: String,
        /// Disable per-item parallel execution
        #[arg(long)]
        sequential: bool,
        /// Cap the worker pool for this transfer
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Move items to another host (sources are deleted after copy)
    Move {
        /// Source host name or address
        source_host: String,
        /// Source paths
        #[arg(required = true)]
        paths: Vec<String>,
        /// Target host name or address
        #[arg(long)]
        to: String,
        /// Destination directory on the target host
        #[arg(long)]
        dest: String,
        /// Disable per-item parallel execution
        #[arg(long)]
        sequential: bool,
        /// Cap the worker pool for this transfer
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// List a directory on a host
    List {
        /// Host name or address
        host: String,
        /// Directory path (defaults to the host's browse root)
        path: Option<String>,
        /// Include hidden entries
        #[arg(short = 'a', long)]
        all: bool,
        /// Bypass the listing cache
        #[arg(long)]
        refresh: bool,
    },
    /// Delete paths on a host
    Delete {
        /// Host name or address
        host: String,
        /// Paths to delete
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Rename or move a path on a host
    Rename {
        /// Host name or address
        host: String,
        /// Current path
        old_path: String,
        /// New path
        new_path: String,
    },
    /// Create a directory on a host
    Mkdir {
        /// Host name or address
        host: String,
        /// Directory to create
        path: String,
    },
    /// Show registered hosts
    Hosts,
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.quiet)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Copy {
            source_host,
            paths,
            to,
            dest,
            sequential,
            workers,
        } => {
            transfer_command(
                config,
                source_host,
                paths,
                to,
                dest,
                TransferIntent::Copy,
                sequential,
                workers,
                cli.quiet,
            )
            .await
        }
        Commands::Move {
            source_host,
            paths,
            to,
            dest,
            sequential,
            workers,
        } => {
            transfer_command(
                config,
                source_host,
                paths,
                to,
                dest,
                TransferIntent::Move,
                sequential,
                workers,
                cli.quiet,
            )
            .await
        }
        Commands::List {
            host,
            path,
            all,
            refresh,
        } => list_command(config, host, path, all, refresh).await,
        Commands::Delete { host, paths } => {
            let engine = TransferEngine::new(config);
            engine
                .delete_paths("cli", &host, &paths)
                .await
                .context("delete failed")?;
            println!("{} deleted {} path(s)", style("✓").green(), paths.len());
            Ok(())
        }
        Commands::Rename {
            host,
            old_path,
            new_path,
        } => {
            let engine = TransferEngine::new(config);
            engine
                .rename("cli", &host, &old_path, &new_path)
                .await
                .context("rename failed")?;
            println!("{} {} -> {}", style("✓").green(), old_path, new_path);
            Ok(())
        }
        Commands::Mkdir { host, path } => {
            let engine = TransferEngine::new(config);
            engine
                .create_dir("cli", &host, &path)
                .await
                .context("mkdir failed")?;
            println!("{} created {}", style("✓").green(), path);
            Ok(())
        }
        Commands::Hosts => hosts_command(&config),
        Commands::Config { default } => config_command(config, default),
    }
}

fn init_logging(debug: bool, quiet: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => ConfigLoader::load_default().context("loading default config"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn transfer_command(
    config: Config,
    source_host: String,
    paths: Vec<String>,
    target_host: String,
    dest: String,
    intent: TransferIntent,
    sequential: bool,
    workers: Option<usize>,
    quiet: bool,
) -> Result<()> {
    let engine = TransferEngine::new(config);
    engine.start_watchdog();
    let mut events = engine.subscribe();

    let items: Vec<FileItem> = paths
        .iter()
        .map(|p| FileItem::new(p.clone(), p.ends_with('/')))
        .collect();
    let mut request = TransferRequest::new(&source_host, &target_host, &dest)
        .with_items(items)
        .with_intent(intent)
        .with_client("cli")
        .with_parallel(!sequential);
    if let Some(workers) = workers {
        request = request.with_max_workers(workers);
    }

    info!(
        "Submitting {} of {} item(s) {} -> {}",
        intent,
        paths.len(),
        source_host,
        target_host
    );
    let id = engine.submit(request).context("submitting transfer")?;
    if !quiet {
        println!(
            "{} {} {} item(s) from {} to {}:{}",
            style("→").green().bold(),
            intent,
            paths.len(),
            style(&source_host).cyan(),
            style(&target_host).cyan(),
            dest
        );
    }

    let bar = (!quiet).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        bar
    });

    let status = loop {
        match events.recv().await {
            Ok(TransferEvent::Progress {
                id: event_id,
                bytes,
                percent,
                speed_mbps,
            }) if event_id == id => {
                if let Some(bar) = &bar {
                    let pct = percent.map_or_else(String::new, |p| format!(" ({:.0}%)", p));
                    bar.set_message(format!(
                        "{}{} at {:.1} MB/s",
                        format_bytes(bytes),
                        pct,
                        speed_mbps
                    ));
                }
            }
            Ok(TransferEvent::Log { id: event_id, line }) if event_id == id => {
                if let Some(bar) = &bar {
                    bar.println(line);
                }
            }
            Ok(TransferEvent::Complete {
                id: event_id,
                status,
                elapsed_secs,
                completed,
                failed,
            }) if event_id == id => {
                if let Some(bar) = &bar {
                    bar.finish_and_clear();
                }
                report_completion(status, elapsed_secs, completed, failed, quiet);
                break status;
            }
            Ok(_) => {}
            Err(err) => anyhow::bail!("event stream ended unexpectedly: {}", err),
        }
    };

    engine.shutdown().await;
    if status == TerminalStatus::Error {
        anyhow::bail!("transfer failed");
    }
    Ok(())
}

fn report_completion(
    status: TerminalStatus,
    elapsed_secs: f64,
    completed: usize,
    failed: usize,
    quiet: bool,
) {
    if quiet {
        return;
    }
    let marker = match status {
        TerminalStatus::Success => style("✓").green().bold(),
        TerminalStatus::PartialSuccess => style("!").yellow().bold(),
        TerminalStatus::Error => style("✗").red().bold(),
    };
    println!(
        "{} {} in {:.1}s ({} completed, {} failed)",
        marker, status, elapsed_secs, completed, failed
    );
}

async fn list_command(
    config: Config,
    host: String,
    path: Option<String>,
    all: bool,
    refresh: bool,
) -> Result<()> {
    let engine = TransferEngine::new(config);
    let entries = engine
        .list_directory(&host, path.as_deref(), all, refresh)
        .await
        .context("listing failed")?;

    for entry in &entries {
        let kind = if entry.is_dir { "d" } else { "-" };
        let size = entry.size.map_or_else(|| "-".to_string(), format_bytes);
        let modified = entry
            .modified
            .map_or_else(|| "-".to_string(), |m| m.format("%Y-%m-%d %H:%M").to_string());
        println!("{} {:>10} {:>16} {}", kind, size, modified, entry.name);
    }
    println!("{} entries", entries.len());
    Ok(())
}

fn hosts_command(config: &Config) -> Result<()> {
    if config.servers.is_empty() {
        println!("no hosts configured");
        return Ok(());
    }
    for server in &config.servers {
        println!(
            "{:<12} {:<16} {:<8} {}@ port {}",
            style(&server.name).cyan(),
            server.address,
            server.os,
            server.user,
            server.port()
        );
    }
    Ok(())
}

fn config_command(config: Config, default: bool) -> Result<()> {
    let shown = if default { Config::default() } else { config };
    let raw = serde_yaml::to_string(&shown).context("serializing config")?;
    println!("{}", raw);
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
