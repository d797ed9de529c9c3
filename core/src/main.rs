//! Command line front end for replaying logged sensor data through the propagator.
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, error, info};
use nalgebra::{Quaternion, Vector3};

use navmerge::linalg::normalize_quaternion;
use navmerge::sim::{FailurePolicy, SensorRecord, replay};
use navmerge::{PropagatorConfig, State, StatePropagator};

const LONG_ABOUT: &str = "Replays a CSV log of sensor cycles through the single-step state propagator.

Each input row is one measurement batch (dt, altitude, gps_x..z, gyro_x..z, accel_nc_x..z, accel_c_x..z, qw, qx, qy, qz, optional airspeed). The output is one row per propagated state (time, pos_x..z, vel_x..z, qw, qx, qy, qz), starting with the initial state.

The propagator is configured from a JSON, YAML or TOML file; use `create-config` to write a template.";

#[derive(Debug, Parser)]
#[command(author, version, about = "Single-step navigation state propagation by sensor blending", long_about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,

    /// Log file path (logs to stderr if not set)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Propagate a state through a CSV log of sensor cycles")]
    Run(RunArgs),
    #[command(
        name = "create-config",
        about = "Write a configuration file with the default settings"
    )]
    CreateConfig {
        /// Output path; the format follows the extension (.json, .yaml, .yml, .toml)
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Sensor log CSV
    #[arg(short, long)]
    input: PathBuf,
    /// Output CSV of propagated states
    #[arg(short, long)]
    output: PathBuf,
    /// Configuration file (defaults are used if not set)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// What to do when a record is rejected
    #[arg(long, value_enum, default_value_t = FailurePolicy::Halt)]
    policy: FailurePolicy,
    #[command(flatten)]
    initial: InitialStateArgs,
}

#[derive(Debug, Args)]
struct InitialStateArgs {
    /// Initial time in seconds
    #[arg(long, default_value_t = 0.0)]
    initial_time: f64,
    /// Initial position x,y,z in meters
    #[arg(long, value_delimiter = ',', default_value = "0,0,0", allow_hyphen_values = true)]
    initial_position: Vec<f64>,
    /// Initial velocity x,y,z in m/s
    #[arg(long, value_delimiter = ',', default_value = "0,0,0", allow_hyphen_values = true)]
    initial_velocity: Vec<f64>,
    /// Initial attitude w,x,y,z (normalized on load)
    #[arg(long, value_delimiter = ',', default_value = "1,0,0,0", allow_hyphen_values = true)]
    initial_attitude: Vec<f64>,
}

impl InitialStateArgs {
    fn to_state(&self) -> Result<State, Box<dyn Error>> {
        let [px, py, pz] = self.initial_position[..] else {
            return Err("initial position needs three values".into());
        };
        let [vx, vy, vz] = self.initial_velocity[..] else {
            return Err("initial velocity needs three values".into());
        };
        let [w, x, y, z] = self.initial_attitude[..] else {
            return Err("initial attitude needs four values".into());
        };
        let state = State::new(
            self.initial_time,
            Vector3::new(px, py, pz),
            Vector3::new(vx, vy, vz),
            normalize_quaternion(Quaternion::new(w, x, y, z), "initial_attitude")?,
        );
        state.validate()?;
        Ok(state)
    }
}

/// Install the process logger: timestamped lines on stderr, or appended to `log_file`.
fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            PropagatorConfig::from_file(path)?
        }
        None => PropagatorConfig::default(),
    };
    let propagator = StatePropagator::new(&config)?;
    let initial = args.initial.to_state()?;

    let records = SensorRecord::from_csv(&args.input)?;
    info!(
        "Read {} sensor records from {}",
        records.len(),
        args.input.display()
    );

    let result = replay(&propagator, initial, &records, args.policy)?;
    if let Some(last) = result.last() {
        info!("Final state: {last}");
    }
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    result.to_csv(&args.output)?;
    info!(
        "Wrote {} states to {}",
        result.states.len(),
        args.output.display()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(cli.log_level, cli.log_file.as_deref())?;

    let outcome = match &cli.command {
        Command::Run(args) => run(args),
        Command::CreateConfig { output } => PropagatorConfig::default()
            .to_file(output)
            .map(|_| info!("Wrote default configuration to {}", output.display()))
            .map_err(Into::into),
    };
    if let Err(e) = &outcome {
        error!("{e}");
    }
    outcome
}
