//! ISL Tasking Simulator CLI
//!
//! Compares ground-gated and ISL-forwarded tasking over a time-varying
//! topology, optionally under synthetic loss.

use anyhow::{bail, Context, Result};
use clap::Parser;
use isltask_core::{ArrivalProcess, LossProfile, SimConfig, TaskingMode};
use isltask_sim::{BackendKind, ExperimentRunner, RunOutput, ScenarioId, SweepGrid, TopologySource};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// ISL tasking experiment CLI
#[derive(Parser, Debug)]
#[command(name = "isltask-sim")]
#[command(about = "Compare ground-gated and ISL-forwarded tasking", long_about = None)]
struct Args {
    /// JSON configuration file (flags below override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Master seed for determinism
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of satellites
    #[arg(long)]
    sats: Option<u32>,

    /// Number of ground stations
    #[arg(long)]
    ground: Option<u32>,

    /// Steps to simulate
    #[arg(long)]
    steps: Option<u64>,

    /// Task time-to-live in steps
    #[arg(long)]
    ttl: Option<u64>,

    /// Ground-contact interval in steps (ground-gated admission)
    #[arg(long)]
    contact_interval: Option<u64>,

    /// Steps between task arrivals
    #[arg(long)]
    arrival_interval: Option<u64>,

    /// Acceptance radius for ground contacts
    #[arg(long)]
    radius: Option<f64>,

    /// Hop budget per task
    #[arg(long)]
    max_hops: Option<u32>,

    /// Outage probability per hop
    #[arg(long)]
    outage: Option<f64>,

    /// Congestion drop probability per hop
    #[arg(long)]
    congestion: Option<f64>,

    /// Tamper probability per hop
    #[arg(long)]
    attack: Option<f64>,

    /// Tasking mode: ground, isl or both
    #[arg(short, long, default_value = "both")]
    mode: String,

    /// Topology: stub, partition or schedule:<path>
    #[arg(short, long, default_value = "stub")]
    topology: String,

    /// Named loss preset (baseline, tamper, blackout, congested, lossy)
    #[arg(short = 'S', long)]
    scenario: Option<String>,

    /// Run the default attack x outage x congestion grid
    #[arg(long)]
    sweep: bool,

    /// Write trace and outcome JSONL files here
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Write the summary JSON here
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output on stdout
    #[arg(long)]
    json: bool,
}

impl Args {
    fn build_config(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SimConfig::default(),
        };

        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.sats {
            config.n_satellites = v;
        }
        if let Some(v) = self.ground {
            config.n_ground = v;
        }
        if let Some(v) = self.steps {
            config.steps = v;
        }
        if let Some(v) = self.ttl {
            config.task_ttl_steps = v;
        }
        if let Some(v) = self.contact_interval {
            config.ground_contact_interval = v;
        }
        if let Some(interval) = self.arrival_interval {
            let batch = match config.arrival {
                ArrivalProcess::Fixed { batch, .. } => batch,
                ArrivalProcess::Poisson { .. } => 1,
            };
            config.arrival = ArrivalProcess::Fixed { interval, batch };
        }
        if let Some(v) = self.radius {
            config.acceptance_radius = v;
        }
        if let Some(v) = self.max_hops {
            config.max_hops = v;
        }
        self.apply_loss_flags(&mut config.loss);

        config.validate()?;
        Ok(config)
    }

    /// Explicit loss flags win over the config file and any scenario preset.
    fn apply_loss_flags(&self, loss: &mut LossProfile) {
        if let Some(v) = self.outage {
            loss.p_outage = v;
        }
        if let Some(v) = self.congestion {
            loss.p_congestion = v;
        }
        if let Some(v) = self.attack {
            loss.p_attack = v;
        }
    }

    fn modes(&self) -> Result<Vec<TaskingMode>> {
        if self.mode.eq_ignore_ascii_case("both") {
            return Ok(TaskingMode::ALL.to_vec());
        }
        let mode: TaskingMode = self.mode.parse().map_err(anyhow::Error::msg)?;
        Ok(vec![mode])
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn build_runner(args: &Args, backend: BackendKind) -> Result<ExperimentRunner> {
    let config = args.build_config()?;
    let topology = TopologySource::parse(&args.topology).map_err(anyhow::Error::msg)?;

    let mut runner = ExperimentRunner::new(config)
        .with_topology(topology)
        .with_backend(backend);
    if let Some(name) = &args.scenario {
        let scenario: ScenarioId = name.parse().map_err(anyhow::Error::msg)?;
        info!("Scenario {}: {}", scenario, scenario.description());
        runner = runner.with_scenario(scenario);

        let mut loss = runner.config().loss;
        args.apply_loss_flags(&mut loss);
        runner = runner.with_loss(loss);
    }
    if let Some(dir) = &args.trace_dir {
        runner = runner.with_trace_dir(dir);
    }
    Ok(runner)
}

fn run(args: &Args) -> Result<()> {
    let backend = BackendKind::from_env().context("resolving security backend")?;
    if let Some(dir) = &args.trace_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let runner = build_runner(args, backend)?;

    let outputs: Vec<RunOutput> = if args.sweep {
        runner.sweep(&SweepGrid::default())?
    } else {
        let modes = args.modes()?;
        if modes.is_empty() {
            bail!("no tasking mode selected");
        }
        modes
            .into_iter()
            .map(|mode| {
                runner.run_config(SimConfig {
                    mode,
                    ..runner.config().clone()
                })
            })
            .collect::<Result<_, _>>()?
    };

    let rows: Vec<_> = outputs.iter().map(|o| o.summary.clone()).collect();

    if let Some(path) = &args.summary {
        isltask_sim::exporter::write_json_file(path, &rows)?;
        info!("Wrote summary to {}", path.display());
    }

    if args.json {
        let summary = serde_json::json!({
            "seed": runner.config().seed,
            "steps": runner.config().steps,
            "runs": rows,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for row in &rows {
            println!("{}", row.to_table_line());
        }
    }

    let halted = outputs.iter().filter(|o| !o.report.status.is_completed()).count();
    if halted > 0 {
        bail!("{}/{} runs halted", halted, outputs.len());
    }
    Ok(())
}
