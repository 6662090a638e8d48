//! Exam Integrity Agent CLI
//!
//! Violation logging server, offline scoring and threshold replay.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use exam_integrity_agent::{
    config::Config,
    replay::{read_recording, replay},
    scoring::{ScoringEngine, SeverityHistogram},
    sink::jsonl::read_events,
    ViolationEvent, MONITORING_NOTICE, VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exam-integrity")]
#[command(version = VERSION)]
#[command(about = "Multi-signal violation detection and credibility scoring for proctored exams", long_about = None)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the violation logging server
    Serve {
        /// Port to bind (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Keep sessions and violations in memory only
        #[arg(long)]
        memory: bool,
    },

    /// Score an exported violation log (JSON Lines)
    Score {
        /// Path to the violations file
        path: PathBuf,

        /// Only score this session
        #[arg(long)]
        session: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Replay recorded face frames through the detection pipeline
    Replay {
        /// Path to the recording (JSON Lines)
        path: PathBuf,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Display the candidate monitoring notice
    Notice,

    /// Show effective configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::config_path);

    let result = match cli.command {
        Commands::Serve { port, memory } => cmd_serve(&config_path, port, memory),
        Commands::Score {
            path,
            session,
            json,
        } => cmd_score(&config_path, &path, session.as_deref(), json),
        Commands::Replay { path, json } => cmd_replay(&config_path, &path, json),
        Commands::Notice => {
            println!("{MONITORING_NOTICE}");
            Ok(())
        }
        Commands::Config => cmd_config(&config_path),
        Commands::InitConfig { force } => cmd_init_config(&config_path, force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Load configuration, falling back to defaults when the file is missing.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    Ok(Config::load_from(path)?)
}

#[cfg(feature = "server")]
fn cmd_serve(config_path: &Path, port: Option<u16>, memory: bool) -> anyhow::Result<()> {
    use exam_integrity_agent::server::{run, ServerConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let config = load_config(config_path)?;
    let mut server_config = ServerConfig::from_agent_config(config);
    if let Some(port) = port {
        server_config.port = port;
    }
    if memory {
        server_config.persist = false;
    }

    println!("Exam Integrity Agent v{VERSION}");
    if server_config.persist {
        println!("  Data directory: {}", server_config.agent.data_path.display());
    } else {
        println!("  Data directory: (in memory)");
    }

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let (addr, shutdown_tx) = run(server_config).await?;
        println!("  Listening on http://{addr}");
        println!();
        println!("Press Ctrl+C to stop");

        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }

        println!();
        println!("Stopping server...");
        let _ = shutdown_tx.send(());
        // Give in-flight requests a moment to finish.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(())
    })
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_config_path: &Path, _port: Option<u16>, _memory: bool) -> anyhow::Result<()> {
    anyhow::bail!("this build does not include the HTTP server (rebuild with --features server)")
}

fn cmd_score(
    config_path: &Path,
    path: &Path,
    session: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let engine = ScoringEngine::from_config(&config);

    let mut by_session: BTreeMap<String, Vec<ViolationEvent>> = BTreeMap::new();
    for event in read_events(path)? {
        if session.map_or(true, |id| event.session_id == id) {
            by_session.entry(event.session_id.clone()).or_default().push(event);
        }
    }

    if let Some(id) = session {
        // A session with no violations still has a score.
        by_session.entry(id.to_string()).or_default();
    }

    if json {
        let scores: BTreeMap<&String, _> = by_session
            .iter()
            .map(|(id, events)| (id, engine.score(events)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&scores)?);
        return Ok(());
    }

    if by_session.is_empty() {
        println!("No violations found in {}", path.display());
        return Ok(());
    }

    println!(
        "{:<38} {:>5} {:>7} {:>5} {:>5} {:>5} {:>5}  Rating",
        "Session", "Score", "Events", "Crit", "High", "Med", "Low"
    );
    for (id, events) in &by_session {
        let score = engine.score(events);
        let histogram = SeverityHistogram::from_events(events);
        println!(
            "{:<38} {:>5} {:>7} {:>5} {:>5} {:>5} {:>5}  {}",
            id,
            score.score,
            score.total_violations,
            histogram.critical,
            histogram.high,
            histogram.medium,
            histogram.low,
            score.rating()
        );
    }
    Ok(())
}

fn cmd_replay(config_path: &Path, path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let frames = read_recording(path)?;
    if frames.is_empty() {
        anyhow::bail!("recording {} contains no frames", path.display());
    }

    let report = replay(&frames, &config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn cmd_config(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", config_path.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_init_config(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    let config = Config::default();
    config.save_to(config_path)?;
    config.ensure_directories()?;
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}

/// Set up Ctrl+C handler.
#[cfg(feature = "server")]
fn ctrlc_handler(running: std::sync::Arc<std::sync::atomic::AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
