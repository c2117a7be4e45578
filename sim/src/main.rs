//! MCL SIM: A command line driver for the Monte Carlo Localization exercises.
//!
//! This program can operate in three modes: mcl, belief, and odometry.
//!
//! - MCL mode: A simulated robot moves through a square, toroidal world and measures noisy ranges to a set of
//!   landmarks. A particle filter tracks it with a move / sense / resample cycle.
//!
//! - Belief mode: A particle cloud is pushed open-loop through a list of motion commands without any
//!   measurement update, showing how the position belief spreads under a noisy motion model.
//!
//! - Odometry mode: An ideal square trajectory is compared with one dead-reckoned from noisy speed and
//!   yaw-rate readings.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Specifying parameters via command-line flags

mod common;
#[cfg(feature = "plotting")]
mod plotting;

use clap::{Args, Parser, Subcommand, ValueEnum};
use common::{init_logger, output_file, validate_config_extension, validate_output_path};
#[cfg(not(feature = "plotting"))]
use log::error;
use log::info;
use mcl::motion::MotionNoise;
use mcl::odometry::OdometryParameters;
use mcl::particle::{NoiseParameters, ResamplingStrategy};
use mcl::sim::{
    DegeneratePolicy, SimulationConfig, SimulationMode, belief_to_csv, run_belief,
    run_localization, run_odometry,
};
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "MCL SIM: A command line driver for the Monte Carlo Localization exercises.

This program can operate in three modes: mcl, belief, and odometry.

- MCL mode: A simulated robot moves through a square, toroidal world and measures noisy ranges
  to a set of landmarks. A particle filter tracks it with a move / sense / resample cycle.

- Belief mode: A particle cloud is pushed open-loop through a list of motion commands without
  any measurement update, showing how the position belief spreads under a noisy motion model.

- Odometry mode: An ideal square trajectory is compared with one dead-reckoned from noisy
  speed and yaw-rate readings.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Specifying parameters via command-line flags

Results are written as CSV files to the output directory; add --plot to render PNG figures.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A command line driver for the Monte Carlo Localization exercises.", long_about = LONG_ABOUT)]
struct Cli {
    /// Run simulation from a configuration file (TOML/JSON/YAML)
    /// This option overrides any subcommand arguments
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (ignored if --config is provided)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Render PNG plots of the results next to the CSV files
    #[arg(long, global = true)]
    plot: bool,

    /// Random number generator seed (overrides the configuration file)
    #[arg(long, global = true)]
    seed: Option<u64>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "mcl",
        about = "Run Monte Carlo Localization",
        long_about = "Track a simulated robot in a square, toroidal world with a particle filter. Each step moves the robot and every particle with the same noisy command, weights the particles by the likelihood of the robot's range measurements to the landmarks, and resamples the population in proportion to those weights."
    )]
    Localize(LocalizeArgs),
    #[command(
        name = "belief",
        about = "Sample the position belief under the motion model",
        long_about = "Push a cloud of particles, all starting at the same pose, through the default command sequence without any measurement update. The cloud at every step and the noise free path are written to CSV."
    )]
    Belief(BeliefArgs),
    #[command(
        name = "odometry",
        about = "Compare an ideal square with a dead-reckoned one",
        long_about = "Drive a square once with perfect knowledge and once by integrating noisy speed and yaw-rate readings, and record the growing position error."
    )]
    Odometry(OdometryArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Output directory shared by all simulation commands
#[derive(Args, Clone, Debug)]
struct OutputArgs {
    /// Output directory for CSV files (and plots)
    #[arg(short, long, value_parser, default_value = "output")]
    output: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ResamplingArg {
    Multinomial,
    Systematic,
    Residual,
}
impl From<ResamplingArg> for ResamplingStrategy {
    fn from(arg: ResamplingArg) -> Self {
        match arg {
            ResamplingArg::Multinomial => ResamplingStrategy::Multinomial,
            ResamplingArg::Systematic => ResamplingStrategy::Systematic,
            ResamplingArg::Residual => ResamplingStrategy::Residual,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DegenerateArg {
    Reinitialize,
    Skip,
    Abort,
}
impl From<DegenerateArg> for DegeneratePolicy {
    fn from(arg: DegenerateArg) -> Self {
        match arg {
            DegenerateArg::Reinitialize => DegeneratePolicy::Reinitialize,
            DegenerateArg::Skip => DegeneratePolicy::Skip,
            DegenerateArg::Abort => DegeneratePolicy::Abort,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Mcl,
    Belief,
    Odometry,
}
impl From<ModeArg> for SimulationMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Mcl => SimulationMode::Localization,
            ModeArg::Belief => SimulationMode::Belief,
            ModeArg::Odometry => SimulationMode::Odometry,
        }
    }
}

/// Particle filter arguments
#[derive(Args, Clone, Debug)]
struct LocalizeArgs {
    #[command(flatten)]
    output: OutputArgs,

    /// Number of particles
    #[arg(long, default_value_t = 1000)]
    particles: usize,

    /// Number of move / sense / resample cycles
    #[arg(long, default_value_t = 20)]
    steps: usize,

    /// Turn commanded at every step (rad)
    #[arg(long, default_value_t = 0.1)]
    turn: f64,

    /// Forward distance commanded at every step
    #[arg(long, default_value_t = 5.0)]
    forward: f64,

    /// Side length of the toroidal world
    #[arg(long, default_value_t = 100.0)]
    world_size: f64,

    /// Forward motion noise std dev
    #[arg(long, default_value_t = 0.05)]
    forward_noise: f64,

    /// Turn noise std dev (rad)
    #[arg(long, default_value_t = 0.05)]
    turn_noise: f64,

    /// Range measurement noise std dev
    #[arg(long, default_value_t = 5.0)]
    sense_noise: f64,

    /// Resampling algorithm
    #[arg(long, value_enum, default_value_t = ResamplingArg::Multinomial)]
    resampling: ResamplingArg,

    /// What to do when every particle weight vanishes
    #[arg(long, value_enum, default_value_t = DegenerateArg::Reinitialize)]
    on_degenerate: DegenerateArg,
}

/// Belief propagation arguments
#[derive(Args, Clone, Debug)]
struct BeliefArgs {
    #[command(flatten)]
    output: OutputArgs,

    /// Number of particles in the cloud
    #[arg(long, default_value_t = 2000)]
    particles: usize,

    /// Turn noise std dev (rad)
    #[arg(long, default_value_t = 0.1)]
    turn_noise: f64,

    /// Forward noise std dev
    #[arg(long, default_value_t = 0.2)]
    forward_noise: f64,
}

/// Odometry drift arguments
#[derive(Args, Clone, Debug)]
struct OdometryArgs {
    #[command(flatten)]
    output: OutputArgs,

    /// Commanded forward speed (m/s)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Integration step (s)
    #[arg(long, default_value_t = 0.1)]
    dt: f64,

    /// Side length of the square (m)
    #[arg(long, default_value_t = 2.0)]
    side_length: f64,

    /// Duration of each 90 degree turn (s)
    #[arg(long, default_value_t = 0.5)]
    turn_duration: f64,

    /// Speed reading noise std dev (m/s)
    #[arg(long, default_value_t = 0.05)]
    sigma_v: f64,

    /// Yaw rate reading noise std dev (rad/s)
    #[arg(long, default_value_t = 0.02)]
    sigma_omega: f64,
}

/// Template configuration arguments
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Path of the configuration file to write (.toml, .json, .yaml or .yml)
    #[arg(short, long, default_value = "mcl_config.toml")]
    output: PathBuf,

    /// Simulation mode stored in the template
    #[arg(long, value_enum, default_value_t = ModeArg::Mcl)]
    mode: ModeArg,
}

impl LocalizeArgs {
    fn to_config(&self) -> SimulationConfig {
        let mut config = SimulationConfig {
            mode: SimulationMode::Localization,
            output: self.output.output.display().to_string(),
            ..SimulationConfig::default()
        };
        let localization = &mut config.localization;
        localization.steps = self.steps;
        localization.command.turn = self.turn;
        localization.command.forward = self.forward;
        localization.on_degenerate = self.on_degenerate.into();
        localization.filter.world_size = self.world_size;
        localization.filter.num_particles = self.particles;
        localization.filter.resampling = self.resampling.into();
        localization.filter.noise = NoiseParameters {
            forward_noise: self.forward_noise,
            turn_noise: self.turn_noise,
            sense_noise: self.sense_noise,
        };
        config
    }
}

impl BeliefArgs {
    fn to_config(&self) -> SimulationConfig {
        let mut config = SimulationConfig {
            mode: SimulationMode::Belief,
            output: self.output.output.display().to_string(),
            ..SimulationConfig::default()
        };
        config.belief.num_particles = self.particles;
        config.belief.noise = MotionNoise {
            turn_noise: self.turn_noise,
            forward_noise: self.forward_noise,
        };
        config
    }
}

impl OdometryArgs {
    fn to_config(&self) -> SimulationConfig {
        SimulationConfig {
            mode: SimulationMode::Odometry,
            output: self.output.output.display().to_string(),
            odometry: OdometryParameters {
                speed: self.speed,
                dt: self.dt,
                side_length: self.side_length,
                turn_duration: self.turn_duration,
                sigma_v: self.sigma_v,
                sigma_omega: self.sigma_omega,
            },
            ..SimulationConfig::default()
        }
    }
}

/// Run the simulation described by `config` and write its results to `config.output`.
fn run_simulation(config: &SimulationConfig) -> Result<(), Box<dyn Error>> {
    let output = Path::new(&config.output);
    validate_output_path(output)?;
    info!("Mode: {:?}", config.mode);
    info!("Output: {}", output.display());
    info!("Seed: {}", config.seed);

    match config.mode {
        SimulationMode::Localization => {
            let result = run_localization(&config.localization, config.seed)?;
            let records_path = output_file(output, "localization", "csv");
            let particles_path = output_file(output, "particles", "csv");
            result.records_to_csv(&records_path)?;
            result.particles_to_csv(&particles_path)?;
            info!(
                "Results written to {} and {}",
                records_path.display(),
                particles_path.display()
            );
            #[cfg(feature = "plotting")]
            if config.generate_plot {
                for snapshot in &result.snapshots {
                    let stem = plotting::snapshot_file_stem(snapshot.step);
                    plotting::plot_snapshot(snapshot, &output_file(output, &stem, "png"))?;
                }
                let plot_path = output_file(output, "localization", "png");
                plotting::plot_localization_error(&result.records, &plot_path)?;
                info!("Plots written to {}", output.display());
            }
        }
        SimulationMode::Belief => {
            let history = run_belief(&config.belief, config.seed)?;
            let particles_path = output_file(output, "belief_particles", "csv");
            let path_path = output_file(output, "belief_path", "csv");
            belief_to_csv(&history, &particles_path, &path_path)?;
            info!(
                "Results written to {} and {}",
                particles_path.display(),
                path_path.display()
            );
            #[cfg(feature = "plotting")]
            if config.generate_plot {
                let plot_path = output_file(output, "belief", "png");
                plotting::plot_belief(&history, &plot_path)?;
                info!("Plot written to {}", plot_path.display());
            }
        }
        SimulationMode::Odometry => {
            let result = run_odometry(&config.odometry, config.seed)?;
            let csv_path = output_file(output, "odometry", "csv");
            result.to_csv(&csv_path)?;
            info!("Results written to {}", csv_path.display());
            #[cfg(feature = "plotting")]
            if config.generate_plot {
                let plot_path = output_file(output, "odometry", "png");
                plotting::plot_drift(&result, &plot_path)?;
                info!("Plot written to {}", plot_path.display());
            }
        }
    }

    #[cfg(not(feature = "plotting"))]
    if config.generate_plot {
        error!(
            "Plotting requested but 'plotting' feature not enabled. Rebuild with --features plotting"
        );
    }
    Ok(())
}

/// Apply the command-line overrides to a configuration loaded from file.
fn apply_cli_overrides(config: &mut SimulationConfig, cli_plot: bool, cli_seed: Option<u64>) {
    if cli_plot {
        config.generate_plot = true;
    }
    if let Some(seed) = cli_seed {
        config.seed = seed;
    }
}

fn run_from_config(
    mut config: SimulationConfig,
    cli_plot: bool,
    cli_seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    apply_cli_overrides(&mut config, cli_plot, cli_seed);
    run_simulation(&config)
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    validate_config_extension(&args.output)?;
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let config = SimulationConfig {
        mode: args.mode.into(),
        ..SimulationConfig::default()
    };
    config.to_file(&args.output)?;
    println!("Configuration template written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // If --config is provided, load config and potentially override logger with config values
    if let Some(ref config_path) = cli.config {
        validate_config_extension(config_path)?;
        let config = SimulationConfig::from_file(config_path)?;

        // CLI log file takes precedence over the one in the config
        let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
        let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
        init_logger(&config.logging.level, log_file)?;
        info!("Loaded configuration from {}", config_path.display());

        return run_from_config(config, cli.plot, cli.seed);
    }

    // Initialize logger with CLI settings for command-line mode
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let mut config = match cli.command {
        Some(Command::Localize(ref args)) => args.to_config(),
        Some(Command::Belief(ref args)) => args.to_config(),
        Some(Command::Odometry(ref args)) => args.to_config(),
        Some(Command::CreateConfig(ref args)) => return create_config_file(args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    };
    config.generate_plot = cli.plot;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    config.logging.level = cli.log_level.clone();
    config.logging.file = cli.log_file.as_ref().map(|p| p.display().to_string());
    run_simulation(&config)
}
