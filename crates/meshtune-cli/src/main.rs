// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Command-Line Runner
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! `meshtune`: run the tuner against a simulated rig, offline against
//! the synthetic field, or just validate a configuration file.

mod field;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meshtune_core::{MeasurementOracle, OptimizerLoop};
use meshtune_link::{
    EndMessage, LocalBus, LocalSession, RigSimulator, SessionState, StatusMessage, Topics,
};
use meshtune_types::{Position, SelectionMode, TunerConfig};

use crate::field::SyntheticField;

#[derive(Parser)]
#[command(name = "meshtune")]
#[command(version, about = "Closed-loop gear-mesh alignment tuner", long_about = None)]
struct Cli {
    /// JSON config file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full session over an in-process bus against the simulated rig
    Simulate {
        #[command(flatten)]
        run: RunArgs,

        /// Rig settle time per measurement, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        /// Deliver every bus message twice
        #[arg(long)]
        duplicates: bool,
    },
    /// Run the optimizer directly against the synthetic field
    Offline {
        #[command(flatten)]
        run: RunArgs,

        /// Print the per-iteration history as JSON
        #[arg(long)]
        history: bool,
    },
    /// Validate a config file and print the effective values
    CheckConfig,
}

#[derive(Args)]
struct RunArgs {
    /// X coordinate of the simulated optimum
    #[arg(long, default_value_t = 24.0, allow_hyphen_values = true)]
    optimum_x: f64,

    /// Y coordinate of the simulated optimum
    #[arg(long, default_value_t = -31.0, allow_hyphen_values = true)]
    optimum_y: f64,

    /// Relative ripple amplitude of the synthetic field
    #[arg(long, default_value_t = 0.0)]
    ripple: f64,

    /// Select by weighted rank instead of continuous reward
    #[arg(long)]
    rank: bool,

    /// Override the iteration budget
    #[arg(long)]
    max_iters: Option<u32>,
}

impl RunArgs {
    fn field(&self) -> SyntheticField {
        SyntheticField::new(Position::new(self.optimum_x, self.optimum_y)).with_ripple(self.ripple)
    }

    fn apply(&self, cfg: &mut TunerConfig) {
        if self.rank {
            cfg.optimizer.selection = SelectionMode::Rank;
        }
        if let Some(n) = self.max_iters {
            cfg.optimizer.max_iters = n;
        }
    }
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<TunerConfig, Box<dyn Error>> {
    let cfg = match path {
        Some(p) => {
            info!("loading config from {}", p.display());
            TunerConfig::from_json_file(p)?
        }
        None => TunerConfig::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

fn run_simulated(
    mut cfg: TunerConfig,
    run: &RunArgs,
    delay: Duration,
    duplicates: bool,
) -> Result<(), Box<dyn Error>> {
    run.apply(&mut cfg);
    let bus = Arc::new(LocalBus::new());
    bus.set_duplicate_delivery(duplicates);
    let topics = Topics::new(&cfg.protocol.device_id);

    let oracle = Arc::new(run.field().oracle(delay));
    let rig = Arc::new(RigSimulator::new(bus.clone(), &cfg.protocol.device_id, oracle));
    let rig_worker = Arc::clone(&rig).spawn(bus.subscribe(&topics.cmd_point));
    let watch = bus.subscribe(&topics.device_filter());

    let session = LocalSession::spawn(cfg, bus.clone())?;
    rig.send_start()?;

    let mut outcome: Result<EndMessage, String> = Err("bus closed before the run ended".into());
    for envelope in watch.iter() {
        if envelope.topic == topics.ctrl_end {
            outcome = Ok(serde_json::from_str(&envelope.payload)?);
            break;
        }
        if envelope.topic == topics.status {
            let status: StatusMessage = serde_json::from_str(&envelope.payload)?;
            if status.state == SessionState::Error {
                outcome = Err(status.error_message.unwrap_or_default());
                break;
            }
        }
    }

    session.shutdown()?;
    if rig_worker.join().is_err() {
        warn!("rig simulator thread panicked");
    }
    info!("rig answered {} command(s)", rig.served());

    match outcome {
        Ok(end) => {
            println!("{}", serde_json::to_string_pretty(&end)?);
            Ok(())
        }
        Err(message) => Err(format!("run failed: {message}").into()),
    }
}

fn run_offline(mut cfg: TunerConfig, run: &RunArgs, history: bool) -> Result<(), Box<dyn Error>> {
    run.apply(&mut cfg);
    let cfg = cfg.settings.apply_to(&cfg)?;
    let oracle: Arc<dyn MeasurementOracle> = Arc::new(run.field().oracle(Duration::ZERO));

    let mut optimizer = OptimizerLoop::new(cfg, Arc::clone(&oracle))?;
    let engine = *optimizer.reward_engine();
    let start = optimizer.position();
    let cvi_before = engine.cvi(&oracle.measure(start)?);
    let summary = optimizer.run()?;
    let cvi_after = engine.cvi(&oracle.measure(summary.position)?);
    info!(
        "({:.4}, {:.4}) -> ({:.4}, {:.4}), cvi {cvi_before:.4} -> {cvi_after:.4}",
        start.x, start.y, summary.position.x, summary.position.y
    );

    if history {
        println!("{}", serde_json::to_string_pretty(optimizer.history())?);
    }
    let report = serde_json::json!({
        "start": start,
        "summary": summary,
        "cvi_before": cvi_before,
        "cvi_after": cvi_after,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let cfg = match load_config(cli.config.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("invalid configuration: {e}");
            return Err(e);
        }
    };

    match cli.command {
        Commands::Simulate {
            run,
            delay_ms,
            duplicates,
        } => run_simulated(cfg, &run, Duration::from_millis(delay_ms), duplicates),
        Commands::Offline { run, history } => run_offline(cfg, &run, history),
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            info!("configuration is valid");
            Ok(())
        }
    }
}
