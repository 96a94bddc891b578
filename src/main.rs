//! ShuttlX Sync CLI
//!
//! Runs one side of the phone/watch pair over TCP, or inspects and pokes at
//! the local store.
//!
//! Usage:
//!   shuttlx-sync --role phone serve          # Run until Ctrl-C
//!   shuttlx-sync --role watch status         # Diagnostics snapshot
//!   shuttlx-sync publish-program "Tempo"     # Create and push a program
//!   shuttlx-sync pull --wait 5               # Ask the peer for everything

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Emoji};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shuttlx_sync::monitor::EventLevel;
use shuttlx_sync::{
    DeviceRole, SyncConfig, SyncCoordinator, TcpLink, TrainingIntensity, TrainingInterval,
    TrainingProgram,
};

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "+ ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");
static SYNC: Emoji<'_, '_> = Emoji("🔄 ", "");
static INFO: Emoji<'_, '_> = Emoji("ℹ ", "i ");

#[derive(Parser)]
#[command(name = "shuttlx-sync")]
#[command(author = "e421")]
#[command(version)]
#[command(about = "ShuttlX sync node - keeps phone and watch training data converged")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/shuttlx/<role>.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Which side of the pair this process plays
    #[arg(short, long, global = true, value_enum)]
    role: Option<RoleArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Phone,
    Watch,
}

impl From<RoleArg> for DeviceRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Phone => DeviceRole::Phone,
            RoleArg::Watch => DeviceRole::Watch,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync node until interrupted
    Serve,

    /// Show connectivity, storage and health diagnostics
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored training programs
    Programs,

    /// List stored training sessions
    Sessions,

    /// Create a walk-run program and push it to the peer
    PublishProgram {
        name: String,

        /// Seconds of running per round
        #[arg(long, default_value_t = 60)]
        work: u32,

        /// Seconds of walking per round
        #[arg(long, default_value_t = 120)]
        rest: u32,

        #[arg(long, default_value_t = 5)]
        rounds: u32,
    },

    /// Ask the peer for its full state and wait for the answer
    Pull {
        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },

    /// Delete every session stored on this device
    PurgeSessions {
        /// Don't ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show the sync event log
    Log,

    /// Write the effective configuration to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn load_config(cli: &Cli) -> (SyncConfig, PathBuf) {
    let role = cli.role.map(DeviceRole::from);
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| SyncConfig::default_path(role.unwrap_or(DeviceRole::Phone)));
    (SyncConfig::load_for(&path, role), path)
}

/// Bind the configured address; fall back to an ephemeral port when a
/// serving node already holds it.
async fn bind_link(config: &SyncConfig) -> Result<TcpLink> {
    let conn = &config.connectivity;
    match TcpLink::bind(conn.listen_addr, conn.peer_addr, conn.send_timeout()).await {
        Ok(link) => Ok(link),
        Err(e) => {
            log::warn!(
                "Could not listen on {} ({}); replies from the peer will go to the running node",
                conn.listen_addr,
                e
            );
            let any = SocketAddr::from(([127, 0, 0, 1], 0));
            TcpLink::bind(any, conn.peer_addr, conn.send_timeout())
                .await
                .context("Failed to bind peer link")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let (config, config_path) = load_config(&cli);

    if let Commands::InitConfig { force } = cli.command {
        if config_path.exists() && !force {
            println!(
                "{}{} already exists (use --force to overwrite)",
                CROSS,
                config_path.display()
            );
            return Ok(());
        }
        config
            .save(&config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("{}Wrote {}", CHECK, config_path.display());
        return Ok(());
    }

    let link = bind_link(&config).await?;
    let coordinator =
        SyncCoordinator::new(config, link).context("Failed to open the sync store")?;

    match cli.command {
        Commands::Serve => serve(&coordinator).await?,

        Commands::Status { json } => {
            coordinator.session().activate();
            let diagnostics = coordinator.diagnostics().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&diagnostics)?);
            } else {
                println!("{}", diagnostics);
                if let Some(result) = coordinator.preferences().last_workout_result() {
                    println!(
                        "Last workout: {} ({:.0} min, {:.0} kcal)",
                        result.end.format("%Y-%m-%d %H:%M"),
                        result.total_duration / 60.0,
                        result.active_calories
                    );
                }
            }
        }

        Commands::Programs => {
            let programs = coordinator.programs();
            if programs.is_empty() {
                println!("No programs stored.");
            }
            for (i, p) in programs.iter().enumerate() {
                println!(
                    "{:2}. {} ({}, {} work / {} rest){}",
                    i + 1,
                    style(&p.name).bold(),
                    p.formatted_duration(),
                    p.work_interval_count(),
                    p.rest_interval_count(),
                    if p.is_custom { "" } else { " [built-in]" }
                );
            }
        }

        Commands::Sessions => {
            let sessions = coordinator.sessions();
            if sessions.is_empty() {
                println!("No sessions stored.");
            }
            for (i, s) in sessions.iter().enumerate() {
                println!(
                    "{:2}. {} {} ({:.0} min{})",
                    i + 1,
                    s.start.format("%Y-%m-%d %H:%M"),
                    s.display_name(),
                    s.duration / 60.0,
                    s.distance
                        .map(|d| format!(", {:.2} km", d / 1000.0))
                        .unwrap_or_default()
                );
            }
        }

        Commands::PublishProgram {
            name,
            work,
            rest,
            rounds,
        } => {
            let _handle = coordinator.start();
            let mut intervals = Vec::new();
            for _ in 0..rounds.max(1) {
                intervals.push(TrainingInterval::work(work as f64, TrainingIntensity::Moderate));
                intervals.push(TrainingInterval::rest(rest as f64));
            }

            let program = coordinator.publish(TrainingProgram::new(name, intervals))?;
            println!(
                "{}Saved {} ({})",
                CHECK,
                style(&program.name).bold(),
                program.formatted_duration()
            );

            // give the push a chance to go out before the process exits
            let budget = coordinator.config().retry.backoff(coordinator.config().retry.max_attempts)
                + coordinator.config().connectivity.send_timeout();
            tokio::time::sleep(budget.min(Duration::from_secs(5))).await;
            match coordinator.record_state(&program.id) {
                Some(state) => println!("{}Sync state: {}", INFO, state),
                None => println!("{}Sync state unknown", INFO),
            }
        }

        Commands::Pull { wait } => {
            let _handle = coordinator.start();
            let mut programs = coordinator.subscribe_programs();
            let mut sessions = coordinator.subscribe_sessions();
            programs.borrow_and_update();
            sessions.borrow_and_update();

            let reply = async {
                tokio::time::timeout(Duration::from_secs(wait), async {
                    tokio::select! {
                        _ = programs.changed() => {}
                        _ = sessions.changed() => {}
                    }
                })
                .await
                .is_ok()
            };
            let (sent, answered) = futures::future::join(coordinator.pull_from_peer(), reply).await;

            if !sent {
                println!("{}Peer not reachable; nothing requested", CROSS);
            } else if answered {
                println!(
                    "{}Peer answered: {} programs, {} sessions",
                    CHECK,
                    coordinator.programs().len(),
                    coordinator.sessions().len()
                );
            } else {
                println!("{}Request sent; no changes within {}s", INFO, wait);
            }
        }

        Commands::PurgeSessions { yes } => {
            let count = coordinator.sessions().len();
            if !yes {
                println!(
                    "This deletes {} session(s) from this device. Re-run with --yes to confirm.",
                    count
                );
                return Ok(());
            }
            let removed = coordinator.purge_sessions()?;
            println!("{}Removed {} session(s)", CHECK, removed);
        }

        Commands::Log => {
            let entries = coordinator.monitor().entries();
            if entries.is_empty() {
                println!("Event log is empty.");
            }
            for entry in entries {
                let line = entry.to_string();
                match entry.level {
                    EventLevel::Info => println!("{}", line),
                    EventLevel::Warn => println!("{}", style(line).yellow()),
                    EventLevel::Error => println!("{}", style(line).red()),
                }
            }
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

async fn serve(coordinator: &Arc<SyncCoordinator<TcpLink>>) -> Result<()> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into());

    println!("{}ShuttlX sync node", SYNC);
    println!("========================\n");
    println!("Host:     {}", host);
    println!("Device:   {} ({})", coordinator.device_id(), coordinator.config().role);
    println!("Listen:   {}", coordinator.session().link().local_addr());
    match coordinator.session().link().peer_addr() {
        Some(peer) => println!("Peer:     {}", peer),
        None => println!("Peer:     (none configured)"),
    }
    println!("Storage:  {}\n", coordinator.storage_location());

    let handle = coordinator.start();
    log::info!("Running tasks: {}", handle.task_names().join(", "));

    let mut programs = coordinator.subscribe_programs();
    let mut sessions = coordinator.subscribe_sessions();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            Ok(()) = programs.changed() => {
                println!("{}{} programs", SYNC, programs.borrow_and_update().len());
            }
            Ok(()) = sessions.changed() => {
                println!("{}{} sessions", SYNC, sessions.borrow_and_update().len());
            }
        }
    }

    println!("\nShutting down...");
    handle.stop();
    println!("{}", coordinator.diagnostics().await);
    Ok(())
}
