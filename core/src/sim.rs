//! Simulation drivers, configuration and CSV output for the localization exercises.
//!
//! This module provides:
//! - `SimulationConfig`, a serde configuration read from or written to JSON, YAML or TOML files
//! - `run_localization`, the move / sense / normalize / resample loop with a policy for degenerate weights
//! - `run_belief` and `run_odometry`, seeded wrappers around the [motion](crate::motion) and
//!   [odometry](crate::odometry) exercises
//! - CSV export of per-step records and particle snapshots
use crate::motion::{
    BeliefHistory, MotionCommand, MotionNoise, default_commands, default_initial_pose,
    propagate_belief,
};
use crate::odometry::{DriftResult, OdometryParameters, simulate_drift};
use crate::particle::{FilterConfig, FilterSnapshot, ParticleFilter, effective_sample_size};
use crate::{MclError, Pose, wrap_to_pi};

use csv::Writer;
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Default seed value for reproducible simulations
fn default_seed() -> u64 {
    42
}

/// Which exercise to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    /// Particle filter tracking a simulated robot
    #[default]
    Localization,
    /// Open-loop sampling of the motion model
    Belief,
    /// Ideal versus dead-reckoned square trajectory
    Odometry,
}

/// What the localization loop does when every importance weight vanishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// Redraw the population from the uniform prior and keep going
    #[default]
    Reinitialize,
    /// Keep the moved population, skip resampling for this step
    Skip,
    /// Stop the run and return the error
    Abort,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (off, error, warn, info, debug, trace)
    pub level: String,
    /// Optional log file; logs go to stderr when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Particle filter run: filter description, number of steps and the (constant) command per step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    pub steps: usize,
    pub on_degenerate: DegeneratePolicy,
    pub command: MotionCommand,
    pub filter: FilterConfig,
}
impl Default for LocalizationConfig {
    fn default() -> Self {
        LocalizationConfig {
            steps: 20,
            on_degenerate: DegeneratePolicy::default(),
            command: MotionCommand::new(0.1, 5.0),
            filter: FilterConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeliefConfig {
    pub num_particles: usize,
    pub initial_pose: Pose,
    pub noise: MotionNoise,
    pub commands: Vec<MotionCommand>,
}
impl Default for BeliefConfig {
    fn default() -> Self {
        BeliefConfig {
            num_particles: 2000,
            initial_pose: default_initial_pose(),
            noise: MotionNoise::default(),
            commands: default_commands(),
        }
    }
}

/// Complete description of a simulation run.
///
/// Every section has defaults matching the course exercises, so a configuration file only needs to
/// contain the values it changes.
///
/// # Example
/// ```rust
/// use mcl::sim::{SimulationConfig, SimulationMode};
///
/// let config: SimulationConfig = toml::from_str("mode = \"belief\"\nseed = 7").unwrap();
/// assert_eq!(config.mode, SimulationMode::Belief);
/// assert_eq!(config.belief.num_particles, 2000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub mode: SimulationMode,
    /// Output directory for CSV files and plots
    pub output: String,
    /// Random number generator seed for deterministic runs
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub generate_plot: bool,
    pub logging: LoggingConfig,
    pub localization: LocalizationConfig,
    pub belief: BeliefConfig,
    pub odometry: OdometryParameters,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            mode: SimulationMode::default(),
            output: "output".to_string(),
            seed: default_seed(),
            generate_plot: false,
            logging: LoggingConfig::default(),
            localization: LocalizationConfig::default(),
            belief: BeliefConfig::default(),
            odometry: OdometryParameters::default(),
        }
    }
}
impl SimulationConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

/// One row of the localization CSV: truth, estimate and filter health after a step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub robot_x: f64,
    pub robot_y: f64,
    pub robot_orientation: f64,
    pub estimate_x: f64,
    pub estimate_y: f64,
    pub estimate_orientation: f64,
    pub std_x: f64,
    pub std_y: f64,
    /// Distance between estimate and truth, measured across the world edges
    pub position_error: f64,
    /// Effective sample size of the weights used for resampling (zero on a degenerate step)
    pub effective_sample_size: f64,
    pub degenerate: bool,
}

/// Row of a particle CSV.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub step: usize,
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub orientation: f64,
}

/// Everything recorded by [run_localization].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalizationResult {
    /// One record per step (the initial prior is not recorded)
    pub records: Vec<StepRecord>,
    /// Snapshot of the filter before the first step and after every step
    pub snapshots: Vec<FilterSnapshot>,
}
impl LocalizationResult {
    pub fn final_error(&self) -> Option<f64> {
        self.records.last().map(|r| r.position_error)
    }
    pub fn degenerate_steps(&self) -> usize {
        self.records.iter().filter(|r| r.degenerate).count()
    }
    /// Write the per-step records to a CSV file.
    pub fn records_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), MclError> {
        let mut writer = Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Write every particle of every snapshot to a CSV file.
    pub fn particles_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), MclError> {
        let mut writer = Writer::from_path(path)?;
        for snapshot in &self.snapshots {
            for (index, p) in snapshot.particles.iter().enumerate() {
                writer.serialize(ParticleRecord {
                    step: snapshot.step,
                    index,
                    x: p.x,
                    y: p.y,
                    orientation: p.orientation,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

/// Shortest distance between two positions on the torus of side `world_size`.
pub fn toroidal_distance(a: &Pose, b: &Pose, world_size: f64) -> f64 {
    let scale = world_size / (2.0 * PI);
    let dx = wrap_to_pi((a.x - b.x) / scale) * scale;
    let dy = wrap_to_pi((a.y - b.y) / scale) * scale;
    dx.hypot(dy)
}

/// Run the particle filter for `config.steps` cycles of move, sense, normalize and resample.
///
/// Degenerate weights are handled according to `config.on_degenerate`; any other failure stops the run.
pub fn run_localization(config: &LocalizationConfig, seed: u64) -> Result<LocalizationResult, MclError> {
    let mut pf = ParticleFilter::from_seed(config.filter.clone(), seed)?;
    let world_size = pf.world_size();
    let MotionCommand { turn, forward } = config.command;
    let mut result = LocalizationResult::default();
    result.snapshots.push(pf.snapshot(0));
    info!(
        "Running localization: {} particles, {} steps, command (turn {:.3}, forward {:.3})",
        pf.num_particles(),
        config.steps,
        turn,
        forward
    );
    for step in 1..=config.steps {
        let (ess, degenerate) = match pf.step(turn, forward) {
            Ok(weights) => (effective_sample_size(&weights), false),
            Err(MclError::DegenerateWeights { sum }) => {
                warn!(
                    "Step {}: degenerate weight distribution (sum = {:e}), policy {:?}",
                    step, sum, config.on_degenerate
                );
                match config.on_degenerate {
                    DegeneratePolicy::Abort => return Err(MclError::DegenerateWeights { sum }),
                    DegeneratePolicy::Skip => {}
                    DegeneratePolicy::Reinitialize => pf.reinitialize(),
                }
                (0.0, true)
            }
            Err(e) => return Err(e),
        };
        let estimate = pf.estimate();
        let robot = pf.robot();
        let record = StepRecord {
            step,
            robot_x: robot.x,
            robot_y: robot.y,
            robot_orientation: robot.orientation,
            estimate_x: estimate.pose.x,
            estimate_y: estimate.pose.y,
            estimate_orientation: estimate.pose.orientation,
            std_x: estimate.covariance[(0, 0)].sqrt(),
            std_y: estimate.covariance[(1, 1)].sqrt(),
            position_error: toroidal_distance(&estimate.pose, &robot, world_size),
            effective_sample_size: ess,
            degenerate,
        };
        debug!(
            "Step {}: robot {}, estimate {}, error {:.3}, ESS {:.1}",
            step, robot, estimate.pose, record.position_error, ess
        );
        result.records.push(record);
        result.snapshots.push(pf.snapshot(step));
    }
    if let Some(error) = result.final_error() {
        info!(
            "Localization finished: final error {:.3}, {} degenerate step(s)",
            error,
            result.degenerate_steps()
        );
    }
    Ok(result)
}

/// Propagate the belief cloud of `config` with a seeded generator.
pub fn run_belief(config: &BeliefConfig, seed: u64) -> Result<BeliefHistory, MclError> {
    let mut rng = StdRng::seed_from_u64(seed);
    info!(
        "Running belief propagation: {} particles, {} commands",
        config.num_particles,
        config.commands.len()
    );
    let history = propagate_belief(
        config.initial_pose,
        &config.commands,
        config.num_particles,
        config.noise,
        &mut rng,
    )?;
    if let Some(spread) = history.spread(history.len() - 1) {
        info!(
            "Final cloud: mean ({:.2}, {:.2}), rms radius {:.3}",
            spread.mean_x, spread.mean_y, spread.rms_radius
        );
    }
    Ok(history)
}

/// Write the true path and every particle cloud of a belief run to two CSV files.
pub fn belief_to_csv<P: AsRef<Path>, Q: AsRef<Path>>(
    history: &BeliefHistory,
    particles_path: P,
    path_path: Q,
) -> Result<(), MclError> {
    let mut writer = Writer::from_path(particles_path)?;
    for (step, cloud) in history.particle_sets.iter().enumerate() {
        for (index, p) in cloud.iter().enumerate() {
            writer.serialize(ParticleRecord {
                step,
                index,
                x: p.x,
                y: p.y,
                orientation: p.orientation,
            })?;
        }
    }
    writer.flush()?;
    let mut writer = Writer::from_path(path_path)?;
    for (step, pose) in history.true_path.iter().enumerate() {
        writer.serialize(ParticleRecord {
            step,
            index: 0,
            x: pose.x,
            y: pose.y,
            orientation: pose.orientation,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Simulate the odometry drift exercise with a seeded generator.
pub fn run_odometry(params: &OdometryParameters, seed: u64) -> Result<DriftResult, MclError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let result = simulate_drift(params, &mut rng)?;
    info!(
        "Odometry drift: final error {:.3} m, max error {:.3} m",
        result.final_error().unwrap_or(0.0),
        result.max_error()
    );
    Ok(result)
}
