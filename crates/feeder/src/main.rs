use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context as _};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use tankmill_geom::{ConfigBuilder, LenExt as _, Pose};

use crate::{
    completion::PollConfig,
    connection::{Actuator, HttpActuator},
    executor::{ExecutorConfig, Planner, RunState},
    simulator::SimulatedActuator,
};

mod completion;
mod connection;
mod executor;
mod server;
mod simulator;

const TICK: Duration = Duration::from_millis(50);

/// Drive a tank-steered CNC machine from ordinary Cartesian G-code.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Address of the motion controller, e.g. http://192.168.68.117.
    #[arg(long, env = "TANKMILL_ACTUATOR", global = true)]
    actuator: Option<String>,

    /// Use a simulated machine instead of a real one.
    #[arg(long, global = true)]
    simulate: bool,

    /// Distance between the tracks, in mm.
    #[arg(long, default_value_t = 250.0, global = true)]
    track_width: f64,

    /// Busy-poll interval, in ms.
    #[arg(long, default_value_t = 250, global = true)]
    poll_ms: u64,

    /// Busy-poll interval after a failed poll, in ms.
    #[arg(long, default_value_t = 500, global = true)]
    error_poll_ms: u64,

    /// How long to wait for a single motion to finish, in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    timeout_secs: u64,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Serve the planner's HTTP API.
    Serve {
        #[arg(long, default_value = "0.0.0.0:3001")]
        listen: SocketAddr,
    },
    /// Run a G-code file and wait for it to finish.
    Run {
        path: PathBuf,
        /// With --simulate, draw the simulated path here.
        #[arg(long)]
        svg: Option<PathBuf>,
    },
    /// Print the primitives for a G-code file, as JSON.
    Convert { path: PathBuf },
}

impl Args {
    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            tank: ConfigBuilder::default()
                .with_track_width(self.track_width.mm())
                .build(),
            poll: PollConfig {
                interval: Duration::from_millis(self.poll_ms),
                error_interval: Duration::from_millis(self.error_poll_ms),
                timeout: Duration::from_secs(self.timeout_secs),
            },
        }
    }
}

async fn connect(url: &str) -> anyhow::Result<HttpActuator> {
    let bar = ProgressBar::new_spinner().with_message(format!("Connecting to {url}..."));
    bar.enable_steady_tick(TICK);

    let actuator = HttpActuator::new(url)?;
    if let Err(e) = actuator.check_connection().await {
        bar.abandon_with_message("couldn't connect");
        return Err(e);
    }
    bar.finish_with_message(format!("connected to {}", actuator.base_url()));

    Ok(actuator)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_gcode(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn run_file(planner: &Planner, path: &Path) -> anyhow::Result<()> {
    let plan = planner.convert(&read_gcode(path)?, source_name(path));
    if plan.is_empty() {
        log::warn!("{} has nothing to do", path.display());
        return Ok(());
    }

    let bar = ProgressBar::new(plan.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
    )?);
    bar.set_message(plan.source_name.clone());
    bar.enable_steady_tick(TICK);
    let progress_bar = bar.clone();
    planner.on_progress(move |p| progress_bar.set_position(p.current_index as u64));

    planner.execute(plan)?;
    let status = tokio::select! {
        status = planner.finished() => status,
        _ = tokio::signal::ctrl_c() => {
            bar.abandon_with_message("interrupted");
            if let Err(e) = planner.stop().await {
                eprintln!("the controller may still be moving: {e:#}");
            }
            planner.status()
        }
    };

    match status.state {
        RunState::Complete => {
            bar.finish_with_message("done");
            Ok(())
        }
        RunState::Error => {
            bar.abandon_with_message("failed");
            Err(anyhow!(status.error.unwrap_or_default()))
        }
        state => Err(anyhow!("plan ended in state {state:?}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    let args = Args::parse();
    let config = args.executor_config();

    if let Cmd::Convert { path } = &args.cmd {
        let plan = tankmill_planner::plan(&read_gcode(path)?, source_name(path), Pose::default());
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let sim = args.simulate.then(|| {
        Arc::new(SimulatedActuator::new(config.tank, Pose::default()).with_busy_polls(4))
    });
    let actuator: Arc<dyn Actuator> = match (&sim, &args.actuator) {
        (Some(sim), _) => sim.clone() as Arc<dyn Actuator>,
        (None, Some(url)) => Arc::new(connect(url).await?),
        (None, None) => {
            return Err(anyhow!(
                "no machine to talk to: pass --actuator or --simulate"
            ))
        }
    };
    let planner = Planner::new(actuator, config, Pose::default());

    match args.cmd {
        Cmd::Serve { listen } => server::serve(planner, listen).await,
        Cmd::Run { path, svg } => {
            let ret = run_file(&planner, &path).await;
            if let Some(sim) = &sim {
                let pose = sim.pose();
                log::info!(
                    "simulated machine ended at ({:.2}, {:.2}, {:.2}) facing {:.1}°, spindle {}",
                    pose.x,
                    pose.y,
                    pose.z,
                    pose.heading,
                    if sim.spindle_on() { "on" } else { "off" }
                );
                if let Some(svg) = &svg {
                    sim.illustrate(svg)?;
                }
            }
            ret
        }
        Cmd::Convert { .. } => Ok(()),
    }
}
