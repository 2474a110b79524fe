mod logging;

use std::future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local};
use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use hostpulse::config::{Config, EngineConfig, load_config, load_config_from_path};
use hostpulse::format::parse_timestamp;
use hostpulse::system::SysinfoProbe;
use hostpulse::{AlertThresholds, Dimension, Engine, Store};

#[derive(Parser)]
#[command(
    name = "hostpulse",
    about = "Host metrics agent with threshold alerts and recording sessions"
)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Run without a database
    #[arg(long, global = true, default_value_t = false)]
    no_database: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enable monitoring and stream one dimension as JSON lines
    Run(RunArgs),
    /// List stored alerts, newest first
    Alerts {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// Only alerts not yet acknowledged
        #[arg(long, default_value_t = false)]
        unacknowledged: bool,
    },
    /// Acknowledge an alert
    Ack { id: i64 },
    /// Show metrics history in a time range
    History {
        /// Range start, `YYYY-MM-DD HH:MM:SS` (default: one hour ago)
        #[arg(long)]
        from: Option<String>,
        /// Range end (default: now)
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Delete all metrics history
    ClearHistory,
    /// Processes captured by a recording session
    Recorded {
        session: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// List recording sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Processes ranked by socket activity
    TopNetwork {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Dimension to stream: cpu, memory, processes
    #[arg(long, default_value = "cpu")]
    dimension: Dimension,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    seconds: Option<u64>,

    /// CPU alert threshold in percent (0 disables)
    #[arg(long)]
    cpu_threshold: Option<f64>,

    /// Memory alert threshold in percent (0 disables)
    #[arg(long)]
    memory_threshold: Option<f64>,

    /// Start a recording session lasting this many seconds
    #[arg(long, requires_all = ["record_cpu", "record_ram"])]
    record_seconds: Option<u64>,

    /// Per-process CPU threshold for the recording session
    #[arg(long)]
    record_cpu: Option<f64>,

    /// Per-process memory threshold for the recording session
    #[arg(long)]
    record_ram: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);
    logging::init(&config.logging)?;

    let store = open_store(&config).await?;
    let thresholds = AlertThresholds {
        cpu: config.alerts.cpu_threshold,
        memory: config.alerts.memory_threshold,
    };
    let engine = Engine::new(
        Arc::new(SysinfoProbe::new()),
        store,
        EngineConfig::from_config(&config),
        thresholds,
    );

    if config.history.retention_days > 0 {
        let removed = engine
            .prune_metrics_history(config.history.retention_days)
            .await?;
        if removed > 0 {
            info!(removed, "pruned old metrics history");
        }
    }

    let result = dispatch(&engine, cli.command).await;
    engine.shutdown().await;
    result
}

async fn dispatch(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Run(args) => run(engine, args).await,
        Command::Alerts {
            limit,
            unacknowledged,
        } => print_json(&engine.alerts(limit, unacknowledged).await?),
        Command::Ack { id } => {
            require_store(engine)?;
            if engine.acknowledge_alert(id).await? {
                println!("alert {id} acknowledged");
                Ok(())
            } else {
                Err(eyre!("no alert with id {id}"))
            }
        }
        Command::History { from, to, limit } => {
            let to = match to {
                Some(s) => parse_timestamp(&s).ok_or_else(|| eyre!("invalid --to: {s}"))?,
                None => Local::now(),
            };
            let from = match from {
                Some(s) => parse_timestamp(&s).ok_or_else(|| eyre!("invalid --from: {s}"))?,
                None => to - ChronoDuration::hours(1),
            };
            print_json(&engine.metrics_history(&from, &to, limit).await?)
        }
        Command::ClearHistory => {
            require_store(engine)?;
            let removed = engine.clear_metrics_history().await?;
            println!("removed {removed} history rows");
            Ok(())
        }
        Command::Recorded { session, limit } => {
            print_json(&engine.recorded_processes(session, limit).await?)
        }
        Command::Sessions { limit } => print_json(&engine.sessions(limit).await?),
        Command::TopNetwork { limit } => print_json(&engine.top_network_processes(limit).await?),
    }
}

async fn run(engine: &Engine, args: RunArgs) -> Result<()> {
    if args.cpu_threshold.is_some() || args.memory_threshold.is_some() {
        let current = engine.alert_thresholds().await;
        engine
            .set_alert_thresholds(
                args.cpu_threshold.unwrap_or(current.cpu),
                args.memory_threshold.unwrap_or(current.memory),
            )
            .await;
    }

    engine.set_monitoring_enabled(true).await;

    if let (Some(seconds), Some(cpu), Some(ram)) =
        (args.record_seconds, args.record_cpu, args.record_ram)
    {
        let id = engine.start_recording(cpu, ram, seconds).await?;
        info!(session = id, "recording session started");
    }

    let (tx, mut rx) = mpsc::channel::<String>(16);
    let subscriber = engine.subscribe(args.dimension, tx);

    let deadline = async {
        match args.seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if writeln!(stdout.lock(), "{frame}").is_err() {
                        warn!("stdout closed, stopping stream");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    drop(rx);
    engine.shutdown().await;
    let _ = subscriber.await;
    Ok(())
}

fn require_store(engine: &Engine) -> Result<()> {
    if engine.has_store() {
        Ok(())
    } else {
        Err(eyre!("this command needs a database; set general.database_path or --database"))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(config: &Config) -> Result<Option<Store>> {
    let Some(path) = config.general.database_path() else {
        warn!("no database configured, running without persistence");
        return Ok(None);
    };
    Ok(Some(Store::open(&path).await?))
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(ref path) = cli.database {
        config.general.database_path = path.display().to_string();
    }
    if cli.no_database {
        config.general.database_path.clear();
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_args_parse() {
        let cli = Cli::parse_from([
            "hostpulse",
            "--no-database",
            "run",
            "--dimension",
            "memory",
            "--seconds",
            "3",
        ]);
        let Command::Run(ref args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.dimension, Dimension::Memory);
        assert_eq!(args.seconds, Some(3));
        assert!(cli.no_database);
        assert!(load_config_for_cli(&cli).general.database_path().is_none());
    }

    #[test]
    fn recording_flags_require_thresholds() {
        let parsed = Cli::try_parse_from(["hostpulse", "run", "--record-seconds", "10"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn config_path_is_namespaced() {
        if let Some(path) = hostpulse::config::config_path() {
            assert!(path.ends_with("hostpulse/config.toml"));
        }
    }
}
