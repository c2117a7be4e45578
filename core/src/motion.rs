//! Sampling approximation of the position belief under a noisy motion model.
//!
//! Without any measurement update, a particle cloud pushed through a sequence of motion commands spreads out
//! and bends along the commanded path: each particle is an independent sample of where the robot could be.
//! This module provides the sampling motion model on the unbounded plane and a helper that records the
//! whole cloud at every step next to the noise free path.
//!
//! # Motion model
//!
//! For a command $(\delta_\theta, d)$ and noise levels $(\sigma_\theta, \sigma_d)$ a sample is drawn as
//!
//! $$
//! \hat\delta_\theta \sim \mathcal{N}(\delta_\theta, \sigma_\theta^2), \quad \hat d \sim \mathcal{N}(d, \sigma_d^2)
//! $$
//! $$
//! \theta' = \theta + \hat\delta_\theta, \quad x' = x + \hat d \cos\theta', \quad y' = y + \hat d \sin\theta'
//! $$
//!
//! Headings are stored wrapped to $[0, 2\pi)$; positions are not wrapped.
use crate::{MclError, Pose, wrap_to_2pi};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Turn in place by `turn` radians, then drive `forward` units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub turn: f64,
    pub forward: f64,
}
impl MotionCommand {
    pub fn new(turn: f64, forward: f64) -> MotionCommand {
        MotionCommand { turn, forward }
    }
}
impl From<(f64, f64)> for MotionCommand {
    fn from(tuple: (f64, f64)) -> Self {
        MotionCommand::new(tuple.0, tuple.1)
    }
}

/// Standard deviations of the sampled turn and forward distance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionNoise {
    pub turn_noise: f64,
    pub forward_noise: f64,
}
impl Default for MotionNoise {
    fn default() -> Self {
        MotionNoise {
            turn_noise: 0.1,
            forward_noise: 0.2,
        }
    }
}

/// Sampler for the motion model with fixed noise levels.
#[derive(Clone, Debug)]
pub struct SampledMotionModel {
    turn: Normal<f64>,
    forward: Normal<f64>,
}
impl SampledMotionModel {
    pub fn new(noise: MotionNoise) -> Result<Self, MclError> {
        let std_normal = |name: &'static str, std_dev: f64| {
            if std_dev.is_finite() && std_dev >= 0.0 {
                Normal::new(0.0, std_dev).map_err(|e| MclError::invalid(name, e.to_string()))
            } else {
                Err(MclError::invalid(
                    name,
                    format!("standard deviation must be finite and non-negative, got {std_dev}"),
                ))
            }
        };
        Ok(SampledMotionModel {
            turn: std_normal("turn_noise", noise.turn_noise)?,
            forward: std_normal("forward_noise", noise.forward_noise)?,
        })
    }
    /// Draw one successor pose. The turn is sampled before the distance.
    pub fn sample<R: Rng>(&self, pose: &Pose, command: &MotionCommand, rng: &mut R) -> Pose {
        let noisy_turn = command.turn + self.turn.sample(rng);
        let noisy_forward = command.forward + self.forward.sample(rng);
        apply_motion(pose, noisy_turn, noisy_forward)
    }
}

fn apply_motion(pose: &Pose, turn: f64, forward: f64) -> Pose {
    let heading = pose.orientation + turn;
    Pose::new(
        pose.x + forward * heading.cos(),
        pose.y + forward * heading.sin(),
        wrap_to_2pi(heading),
    )
}

/// Noise free successor of `pose` under `command`.
pub fn ideal_motion(pose: &Pose, command: &MotionCommand) -> Pose {
    apply_motion(pose, command.turn, command.forward)
}

/// One noisy successor of `pose`. Convenience wrapper that builds a [SampledMotionModel] on every call.
pub fn sample_motion<R: Rng>(
    pose: &Pose,
    command: &MotionCommand,
    noise: MotionNoise,
    rng: &mut R,
) -> Result<Pose, MclError> {
    Ok(SampledMotionModel::new(noise)?.sample(pose, command, rng))
}

/// Particle clouds and true path recorded by [propagate_belief].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BeliefHistory {
    /// Noise free pose after each command, starting with the initial pose
    pub true_path: Vec<Pose>,
    /// Particle cloud after each command, starting with the initial cloud
    pub particle_sets: Vec<Vec<Pose>>,
}
/// Summary of one particle cloud.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CloudSpread {
    pub mean_x: f64,
    pub mean_y: f64,
    /// Root mean square distance of the particles from the mean position
    pub rms_radius: f64,
}
impl BeliefHistory {
    /// Number of recorded steps (commands + 1)
    pub fn len(&self) -> usize {
        self.particle_sets.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particle_sets.is_empty()
    }
    /// Mean position and RMS spread of the cloud at `step`, or `None` if the step was not recorded.
    pub fn spread(&self, step: usize) -> Option<CloudSpread> {
        let cloud = self.particle_sets.get(step)?;
        if cloud.is_empty() {
            return None;
        }
        let n = cloud.len() as f64;
        let mean_x = cloud.iter().map(|p| p.x).sum::<f64>() / n;
        let mean_y = cloud.iter().map(|p| p.y).sum::<f64>() / n;
        let mean_square = cloud
            .iter()
            .map(|p| (p.x - mean_x).powi(2) + (p.y - mean_y).powi(2))
            .sum::<f64>()
            / n;
        Some(CloudSpread {
            mean_x,
            mean_y,
            rms_radius: mean_square.sqrt(),
        })
    }
}

/// Push `num_particles` copies of `initial_pose` through `commands`, recording the cloud after every step.
///
/// Every particle is propagated independently with [SampledMotionModel]; the true path follows the same
/// commands without noise.
///
/// # Errors
/// [`MclError::InvalidParameter`] for an empty population or a negative noise level.
pub fn propagate_belief<R: Rng>(
    initial_pose: Pose,
    commands: &[MotionCommand],
    num_particles: usize,
    noise: MotionNoise,
    rng: &mut R,
) -> Result<BeliefHistory, MclError> {
    if num_particles == 0 {
        return Err(MclError::invalid("num_particles", "must be at least one"));
    }
    let model = SampledMotionModel::new(noise)?;
    let mut history = BeliefHistory {
        true_path: Vec::with_capacity(commands.len() + 1),
        particle_sets: Vec::with_capacity(commands.len() + 1),
    };
    let mut truth = initial_pose;
    let mut particles = vec![initial_pose; num_particles];
    history.true_path.push(truth);
    history.particle_sets.push(particles.clone());
    for command in commands {
        truth = ideal_motion(&truth, command);
        particles = particles
            .iter()
            .map(|p| model.sample(p, command, rng))
            .collect();
        history.true_path.push(truth);
        history.particle_sets.push(particles.clone());
    }
    Ok(history)
}

/// The seven-command path of the belief exercise: a staircase up and to the right, then back along the top.
pub fn default_commands() -> Vec<MotionCommand> {
    vec![
        MotionCommand::new(0.0, 10.0),
        MotionCommand::new(-FRAC_PI_2, 0.0),
        MotionCommand::new(0.0, 15.0),
        MotionCommand::new(FRAC_PI_2, 0.0),
        MotionCommand::new(0.0, 10.0),
        MotionCommand::new(FRAC_PI_2, 0.0),
        MotionCommand::new(0.0, 15.0),
    ]
}
/// Start of the belief exercise: origin, facing +y.
pub fn default_initial_pose() -> Pose {
    Pose::new(0.0, 0.0, PI / 2.0)
}
