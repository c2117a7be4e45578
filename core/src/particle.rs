//! Monte Carlo Localization: a particle filter over planar poses in a toroidal world.
//!
//! The filter owns a population of pose hypotheses (particles) together with a simulated "true" robot. Each
//! cycle advances every pose under the same noisy motion model, simulates noisy ranges from the true robot to
//! the known landmarks, weights each particle by the Gaussian likelihood of those ranges and finally draws a
//! new population with replacement in proportion to the weights.
//!
//! ```rust
//! use mcl::particle::{FilterConfig, ParticleFilter, normalize_weights};
//!
//! let mut pf = ParticleFilter::from_seed(FilterConfig::default(), 42).unwrap();
//! for _ in 0..5 {
//!     pf.propagate(0.1, 5.0);
//!     let weights = pf.sense();
//!     let normalized = normalize_weights(&weights).unwrap();
//!     pf.resample(&normalized).unwrap();
//! }
//! assert_eq!(pf.particles().len(), 1000);
//! ```
//!
//! Weighting and resampling are also exposed as free functions ([importance_weights], [normalize_weights],
//! [resample]) so they can be exercised without a filter instance.
use crate::{Landmark, MclError, Pose, default_landmarks, wrap_to_2pi, wrap_to_modulus, wrap_to_pi};

use log::debug;
use nalgebra::{Matrix3, Vector3};
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Debug};

/// Standard deviations of the motion and measurement noise.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParameters {
    /// Standard deviation of the forward distance perturbation
    pub forward_noise: f64,
    /// Standard deviation of the turn perturbation (radians)
    pub turn_noise: f64,
    /// Standard deviation of each range measurement
    pub sense_noise: f64,
}
impl Default for NoiseParameters {
    fn default() -> Self {
        NoiseParameters {
            forward_noise: 0.05,
            turn_noise: 0.05,
            sense_noise: 5.0,
        }
    }
}
impl NoiseParameters {
    pub fn validate(&self) -> Result<(), MclError> {
        check_std("forward_noise", self.forward_noise)?;
        check_std("turn_noise", self.turn_noise)?;
        check_std("sense_noise", self.sense_noise)
    }
}
fn check_std(name: &'static str, value: f64) -> Result<(), MclError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(MclError::invalid(
            name,
            format!("standard deviation must be finite and non-negative, got {value}"),
        ))
    }
}
fn zero_mean_normal(name: &'static str, std_dev: f64) -> Result<Normal<f64>, MclError> {
    check_std(name, std_dev)?;
    Normal::new(0.0, std_dev).map_err(|e| MclError::invalid(name, e.to_string()))
}

/// Algorithm used to draw the next population from the importance weights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// Independent categorical draw per particle
    #[default]
    Multinomial,
    /// Single random offset, N evenly spaced pointers into the cumulative weights
    Systematic,
    /// Deterministic floor(N w) copies, remainder filled systematically from the residuals
    Residual,
}
impl ResamplingStrategy {
    /// Draw `particles.len()` particles with replacement according to `weights`.
    ///
    /// The weights need not be normalized, but they must be non-negative and have a positive, finite sum.
    /// The returned population is in draw order.
    pub fn resample<R: Rng>(
        &self,
        particles: &[Pose],
        weights: &[f64],
        rng: &mut R,
    ) -> Result<Vec<Pose>, MclError> {
        if weights.len() != particles.len() {
            return Err(MclError::WeightLengthMismatch {
                expected: particles.len(),
                actual: weights.len(),
            });
        }
        let normalized = normalize_weights(weights)?;
        match self {
            ResamplingStrategy::Multinomial => Self::multinomial_resample(particles, &normalized, rng),
            ResamplingStrategy::Systematic => {
                Ok(Self::systematic_resample(particles, &normalized, rng))
            }
            ResamplingStrategy::Residual => Ok(Self::residual_resample(particles, &normalized, rng)),
        }
    }
    fn multinomial_resample<R: Rng>(
        particles: &[Pose],
        weights: &[f64],
        rng: &mut R,
    ) -> Result<Vec<Pose>, MclError> {
        let index = WeightedIndex::new(weights).map_err(|_| MclError::DegenerateWeights {
            sum: weights.iter().sum(),
        })?;
        Ok((0..particles.len())
            .map(|_| particles[index.sample(rng)])
            .collect())
    }
    fn systematic_resample<R: Rng>(particles: &[Pose], weights: &[f64], rng: &mut R) -> Vec<Pose> {
        let n = particles.len();
        let step = 1.0 / n as f64;
        let offset = rng.random_range(0.0..step);
        let mut new_particles = Vec::with_capacity(n);
        let mut i = 0;
        let mut cumsum = weights[0];
        for j in 0..n {
            let position = offset + j as f64 * step;
            while position >= cumsum && i < n - 1 {
                i += 1;
                cumsum += weights[i];
            }
            new_particles.push(particles[i]);
        }
        new_particles
    }
    fn residual_resample<R: Rng>(particles: &[Pose], weights: &[f64], rng: &mut R) -> Vec<Pose> {
        let n = particles.len();
        let mut new_particles = Vec::<Pose>::with_capacity(n);
        let mut residual: Vec<f64> = vec![0.0; n];
        for (i, &w) in weights.iter().enumerate() {
            let copies = (w * n as f64).floor() as usize;
            residual[i] = w * n as f64 - copies as f64;
            for _ in 0..copies.min(n - new_particles.len()) {
                new_particles.push(particles[i]);
            }
        }
        let residual_particles = n - new_particles.len();
        let sum_residual: f64 = residual.iter().sum();
        if residual_particles > 0 && sum_residual <= 0.0 {
            // floor() rounding left slots but no residual mass: pad with the heaviest particle
            let heaviest = weights
                .iter()
                .enumerate()
                .fold(0, |best, (i, &w)| if w > weights[best] { i } else { best });
            new_particles.resize(n, particles[heaviest]);
        } else if residual_particles > 0 {
            let step = sum_residual / residual_particles as f64;
            let mut u = rng.random_range(0.0..1.0) * step;
            let mut i = 0;
            let mut cumsum = residual[0];
            for _ in 0..residual_particles {
                while u >= cumsum && i < n - 1 {
                    i += 1;
                    cumsum += residual[i];
                }
                new_particles.push(particles[i]);
                u += step;
            }
        }
        new_particles
    }
}

/// Static description of a filter: world, landmarks, population size, noise and resampling algorithm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Side length of the square, toroidal world
    pub world_size: f64,
    pub num_particles: usize,
    pub resampling: ResamplingStrategy,
    pub noise: NoiseParameters,
    pub landmarks: Vec<Landmark>,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            world_size: 100.0,
            num_particles: 1000,
            resampling: ResamplingStrategy::default(),
            noise: NoiseParameters::default(),
            landmarks: default_landmarks(),
        }
    }
}
impl FilterConfig {
    /// Check every field, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), MclError> {
        if !(self.world_size.is_finite() && self.world_size > 0.0) {
            return Err(MclError::invalid(
                "world_size",
                format!("must be finite and positive, got {}", self.world_size),
            ));
        }
        if self.num_particles == 0 {
            return Err(MclError::invalid("num_particles", "must be at least one"));
        }
        if self.landmarks.is_empty() {
            return Err(MclError::invalid("landmarks", "at least one landmark is required"));
        }
        if let Some(bad) = self
            .landmarks
            .iter()
            .find(|l| !(l.x.is_finite() && l.y.is_finite()))
        {
            return Err(MclError::invalid(
                "landmarks",
                format!("landmark coordinates must be finite, got ({}, {})", bad.x, bad.y),
            ));
        }
        self.noise.validate()
    }
}

/// Mean pose of a population together with the covariance of (x, y, orientation).
///
/// Both the position and the heading are averaged on the circle (the world wraps around), so a cloud that
/// straddles a world edge is still averaged correctly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseEstimate {
    pub pose: Pose,
    pub covariance: Matrix3<f64>,
}

/// Read-only view of the filter handed to the rendering collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub step: usize,
    pub world_size: f64,
    pub robot: Pose,
    pub particles: Vec<Pose>,
    pub landmarks: Vec<Landmark>,
}

/// Particle filter (Monte Carlo Localization) over a toroidal square world.
///
/// The random source is owned by the filter and may be any [`Rng`]; use [`ParticleFilter::from_seed`] for
/// reproducible runs.
#[derive(Clone)]
pub struct ParticleFilter<R: Rng = StdRng> {
    world_size: f64,
    landmarks: Vec<Landmark>,
    particles: Vec<Pose>,
    robot: Pose,
    noise: NoiseParameters,
    resampling_strategy: ResamplingStrategy,
    turn_noise: Normal<f64>,
    forward_noise: Normal<f64>,
    sense_noise: Normal<f64>,
    rng: R,
}
impl<R: Rng> Debug for ParticleFilter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.estimate();
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("world_size", &self.world_size)
            .field("landmarks", &self.landmarks.len())
            .field("robot", &format_args!("{}", self.robot))
            .field("mean", &format_args!("{}", mean.pose))
            .field(
                "std_xy",
                &format_args!(
                    "({:.3}, {:.3})",
                    mean.covariance[(0, 0)].sqrt(),
                    mean.covariance[(1, 1)].sqrt()
                ),
            )
            .field("noise", &self.noise)
            .field("resampling_strategy", &self.resampling_strategy)
            .finish()
    }
}
impl ParticleFilter<StdRng> {
    /// Build a filter driven by a [`StdRng`] seeded with `seed`.
    pub fn from_seed(config: FilterConfig, seed: u64) -> Result<Self, MclError> {
        ParticleFilter::new(config, StdRng::seed_from_u64(seed))
    }
    /// Build a filter driven by a [`StdRng`] with a random seed.
    pub fn with_random_seed(config: FilterConfig) -> Result<Self, MclError> {
        ParticleFilter::new(config, StdRng::seed_from_u64(rand::random()))
    }
}
impl<R: Rng> ParticleFilter<R> {
    /// Create a filter with a uniform prior over pose space.
    ///
    /// The true robot pose is drawn first, then `num_particles` particles in index order, each with
    /// x, y ~ U[0, world_size) and orientation ~ U[0, 2π).
    ///
    /// # Errors
    /// [`MclError::InvalidParameter`] if the world size is not positive, the population is empty, the
    /// landmark set is empty, or any noise level is negative.
    pub fn new(config: FilterConfig, mut rng: R) -> Result<Self, MclError> {
        config.validate()?;
        let turn_noise = zero_mean_normal("turn_noise", config.noise.turn_noise)?;
        let forward_noise = zero_mean_normal("forward_noise", config.noise.forward_noise)?;
        let sense_noise = zero_mean_normal("sense_noise", config.noise.sense_noise)?;
        let robot = uniform_pose(config.world_size, &mut rng);
        let particles = uniform_population(config.num_particles, config.world_size, &mut rng);
        debug!(
            "Initialized particle filter with {} particles in a {} x {} world",
            config.num_particles, config.world_size, config.world_size
        );
        Ok(ParticleFilter {
            world_size: config.world_size,
            landmarks: config.landmarks,
            particles,
            robot,
            noise: config.noise,
            resampling_strategy: config.resampling,
            turn_noise,
            forward_noise,
            sense_noise,
            rng,
        })
    }
    pub fn world_size(&self) -> f64 {
        self.world_size
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn particles(&self) -> &[Pose] {
        &self.particles
    }
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }
    /// Ground truth pose of the simulated robot
    pub fn robot(&self) -> Pose {
        self.robot
    }
    pub fn noise(&self) -> NoiseParameters {
        self.noise
    }
    pub fn resampling_strategy(&self) -> ResamplingStrategy {
        self.resampling_strategy
    }
    pub fn rng(&self) -> &R {
        &self.rng
    }
    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }
    /// Replace the population, e.g. with the result of a caller-side [resample].
    ///
    /// Poses are wrapped into the world. The population size may not change.
    pub fn set_particles(&mut self, particles: Vec<Pose>) -> Result<(), MclError> {
        if particles.len() != self.particles.len() {
            return Err(MclError::invalid(
                "particles",
                format!(
                    "population size is fixed at {}, got {}",
                    self.particles.len(),
                    particles.len()
                ),
            ));
        }
        let world_size = self.world_size;
        self.particles = particles
            .into_iter()
            .map(|p| wrap_pose(&p, world_size))
            .collect();
        Ok(())
    }
    /// Teleport the simulated robot (wrapped into the world).
    pub fn set_robot(&mut self, robot: Pose) {
        self.robot = wrap_pose(&robot, self.world_size);
    }
    /// Redraw the whole population from the uniform prior. The robot is left untouched.
    pub fn reinitialize(&mut self) {
        self.particles = uniform_population(self.particles.len(), self.world_size, &mut self.rng);
    }
    /// Motion update: turn by `turn` radians, then drive `forward` units.
    ///
    /// The robot moves first, then every particle in index order. Each pose draws its own turn perturbation
    /// followed by its own forward perturbation.
    pub fn propagate(&mut self, turn: f64, forward: f64) {
        let world_size = self.world_size;
        self.robot = toroidal_motion(
            &self.robot,
            turn,
            forward,
            world_size,
            &self.turn_noise,
            &self.forward_noise,
            &mut self.rng,
        );
        for particle in self.particles.iter_mut() {
            *particle = toroidal_motion(
                particle,
                turn,
                forward,
                world_size,
                &self.turn_noise,
                &self.forward_noise,
                &mut self.rng,
            );
        }
    }
    /// Simulated range measurements from the true robot to every landmark, in landmark order.
    pub fn measure(&mut self) -> Vec<f64> {
        let robot = self.robot;
        self.landmarks
            .iter()
            .map(|landmark| landmark.range_from(&robot) + self.sense_noise.sample(&mut self.rng))
            .collect()
    }
    /// Take one measurement and return the unnormalized importance weight of every particle.
    pub fn sense(&mut self) -> Vec<f64> {
        // measure() yields one range per landmark
        let measurements = self.measure();
        let sense_noise = self.noise.sense_noise;
        self.particles
            .iter()
            .map(|p| particle_weight(p, &self.landmarks, &measurements, sense_noise))
            .collect()
    }
    /// Replace the population by a draw proportional to `weights` using the configured strategy.
    ///
    /// # Errors
    /// [`MclError::DegenerateWeights`] when the weights sum to zero or are not finite, in which case the
    /// population is left unchanged.
    pub fn resample(&mut self, weights: &[f64]) -> Result<(), MclError> {
        self.particles = self
            .resampling_strategy
            .resample(&self.particles, weights, &mut self.rng)?;
        Ok(())
    }
    /// One full predict / weight / resample cycle. Returns the normalized weights used for resampling.
    ///
    /// If the weights are degenerate the motion update has already been applied and the error is returned
    /// before resampling.
    pub fn step(&mut self, turn: f64, forward: f64) -> Result<Vec<f64>, MclError> {
        self.propagate(turn, forward);
        let weights = self.sense();
        let normalized = normalize_weights(&weights)?;
        debug!(
            "Effective sample size {:.1} of {}",
            effective_sample_size(&normalized),
            normalized.len()
        );
        self.resample(&normalized)?;
        Ok(normalized)
    }
    /// Unweighted estimate of the current population.
    pub fn estimate(&self) -> PoseEstimate {
        let uniform = vec![1.0; self.particles.len()];
        circular_estimate(&self.particles, &uniform, self.world_size)
    }
    /// Estimate of the population weighted by `weights` (normalized or not).
    pub fn weighted_estimate(&self, weights: &[f64]) -> Result<PoseEstimate, MclError> {
        if weights.len() != self.particles.len() {
            return Err(MclError::WeightLengthMismatch {
                expected: self.particles.len(),
                actual: weights.len(),
            });
        }
        let normalized = normalize_weights(weights)?;
        Ok(circular_estimate(&self.particles, &normalized, self.world_size))
    }
    pub fn snapshot(&self, step: usize) -> FilterSnapshot {
        FilterSnapshot {
            step,
            world_size: self.world_size,
            robot: self.robot,
            particles: self.particles.clone(),
            landmarks: self.landmarks.clone(),
        }
    }
}

fn uniform_pose<R: Rng>(world_size: f64, rng: &mut R) -> Pose {
    let x = rng.random_range(0.0..world_size);
    let y = rng.random_range(0.0..world_size);
    let orientation = rng.random_range(0.0..2.0 * PI);
    Pose::new(x, y, orientation)
}
fn uniform_population<R: Rng>(num_particles: usize, world_size: f64, rng: &mut R) -> Vec<Pose> {
    (0..num_particles)
        .map(|_| uniform_pose(world_size, rng))
        .collect()
}
fn wrap_pose(pose: &Pose, world_size: f64) -> Pose {
    Pose::new(
        wrap_to_modulus(pose.x, world_size),
        wrap_to_modulus(pose.y, world_size),
        wrap_to_2pi(pose.orientation),
    )
}

/// Noisy turn-then-drive motion on the torus.
///
/// θ' = (θ + turn + ε_turn) mod 2π and (x', y') = (x, y) + (cos θ', sin θ') (forward + ε_fwd), each
/// coordinate taken mod `world_size`. The turn perturbation is drawn before the forward one.
pub fn toroidal_motion<R: Rng>(
    pose: &Pose,
    turn: f64,
    forward: f64,
    world_size: f64,
    turn_noise: &Normal<f64>,
    forward_noise: &Normal<f64>,
    rng: &mut R,
) -> Pose {
    let orientation = wrap_to_2pi(pose.orientation + turn + turn_noise.sample(rng));
    let distance = forward + forward_noise.sample(rng);
    Pose::new(
        wrap_to_modulus(pose.x + orientation.cos() * distance, world_size),
        wrap_to_modulus(pose.y + orientation.sin() * distance, world_size),
        orientation,
    )
}

/// Gaussian probability density of `error` for a zero-mean normal with standard deviation `sigma`.
///
/// With `sigma == 0` the density degenerates to an indicator: 1 for an exact match, 0 otherwise.
pub fn gaussian_likelihood(error: f64, sigma: f64) -> f64 {
    if sigma == 0.0 {
        return if error == 0.0 { 1.0 } else { 0.0 };
    }
    let variance = sigma * sigma;
    (-(error * error) / (2.0 * variance)).exp() / (2.0 * PI * variance).sqrt()
}

/// Unnormalized importance weight of every particle given the landmark ranges `measurements`.
///
/// The weight of a particle is the product over landmarks of the likelihood of the measured range given
/// the range predicted from the particle's pose. The particles are not modified.
///
/// # Errors
/// [`MclError::MeasurementLengthMismatch`] unless there is exactly one measurement per landmark.
pub fn importance_weights(
    particles: &[Pose],
    landmarks: &[Landmark],
    measurements: &[f64],
    sense_noise: f64,
) -> Result<Vec<f64>, MclError> {
    if measurements.len() != landmarks.len() {
        return Err(MclError::MeasurementLengthMismatch {
            expected: landmarks.len(),
            actual: measurements.len(),
        });
    }
    Ok(particles
        .iter()
        .map(|particle| particle_weight(particle, landmarks, measurements, sense_noise))
        .collect())
}
fn particle_weight(particle: &Pose, landmarks: &[Landmark], measurements: &[f64], sense_noise: f64) -> f64 {
    landmarks
        .iter()
        .zip(measurements.iter())
        .map(|(landmark, &measured)| {
            gaussian_likelihood(measured - landmark.range_from(particle), sense_noise)
        })
        .product()
}

/// Scale `weights` to sum to one.
///
/// # Errors
/// - [`MclError::InvalidWeight`] for a negative, infinite or NaN entry.
/// - [`MclError::DegenerateWeights`] if the weights sum to zero (including an empty vector) or overflow.
pub fn normalize_weights(weights: &[f64]) -> Result<Vec<f64>, MclError> {
    if let Some((index, &value)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
    {
        return Err(MclError::InvalidWeight { index, value });
    }
    let sum: f64 = weights.iter().sum();
    if !(sum > 0.0 && sum.is_finite()) {
        return Err(MclError::DegenerateWeights { sum });
    }
    Ok(weights.iter().map(|w| w / sum).collect())
}

/// Draw a new population of the same size with the given strategy. See [`ResamplingStrategy::resample`].
pub fn resample<R: Rng>(
    particles: &[Pose],
    weights: &[f64],
    strategy: ResamplingStrategy,
    rng: &mut R,
) -> Result<Vec<Pose>, MclError> {
    strategy.resample(particles, weights, rng)
}

/// Kish effective sample size, $(\sum w)^2 / \sum w^2$. Zero for an all-zero vector.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum: f64 = weights.iter().sum();
    let sum_of_squares: f64 = weights.iter().map(|w| w * w).sum();
    if sum_of_squares > 0.0 {
        sum * sum / sum_of_squares
    } else {
        0.0
    }
}

/// Weighted circular mean and covariance of a population. `weights` must sum to a positive value.
fn circular_estimate(particles: &[Pose], weights: &[f64], world_size: f64) -> PoseEstimate {
    let total: f64 = weights.iter().sum();
    let to_angle = 2.0 * PI / world_size;
    let mean_x = circular_mean(particles.iter().map(|p| p.x * to_angle), weights) / to_angle;
    let mean_y = circular_mean(particles.iter().map(|p| p.y * to_angle), weights) / to_angle;
    let mean_orientation = circular_mean(particles.iter().map(|p| p.orientation), weights);
    let mean = Pose::new(
        wrap_to_modulus(mean_x, world_size),
        wrap_to_modulus(mean_y, world_size),
        mean_orientation,
    );
    let mut covariance = Matrix3::<f64>::zeros();
    for (particle, &w) in particles.iter().zip(weights.iter()) {
        let diff = Vector3::new(
            wrap_to_pi((particle.x - mean.x) * to_angle) / to_angle,
            wrap_to_pi((particle.y - mean.y) * to_angle) / to_angle,
            wrap_to_pi(particle.orientation - mean.orientation),
        );
        covariance += (w / total) * diff * diff.transpose();
    }
    PoseEstimate {
        pose: mean,
        covariance,
    }
}
fn circular_mean(angles: impl Iterator<Item = f64>, weights: &[f64]) -> f64 {
    let (sin_sum, cos_sum) = angles
        .zip(weights.iter())
        .fold((0.0, 0.0), |(s, c), (angle, &w)| {
            (s + w * angle.sin(), c + w * angle.cos())
        });
    wrap_to_2pi(sin_sum.atan2(cos_sum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn small_config(num_particles: usize) -> FilterConfig {
        FilterConfig {
            num_particles,
            ..FilterConfig::default()
        }
    }
    fn grid(n: usize) -> Vec<Pose> {
        (0..n).map(|i| Pose::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_new_uniform_prior() {
        let pf = ParticleFilter::from_seed(FilterConfig::default(), 7).unwrap();
        assert_eq!(pf.num_particles(), 1000);
        for p in pf.particles() {
            assert!(p.x >= 0.0 && p.x < 100.0);
            assert!(p.y >= 0.0 && p.y < 100.0);
            assert!(p.orientation >= 0.0 && p.orientation < 2.0 * PI);
        }
        // Spread over the whole world rather than clumped
        let est = pf.estimate();
        assert!(est.covariance[(0, 0)].sqrt() > 20.0);
    }
    #[test]
    fn test_invalid_construction() {
        let bad_world = FilterConfig {
            world_size: 0.0,
            ..FilterConfig::default()
        };
        assert!(matches!(
            ParticleFilter::from_seed(bad_world, 1),
            Err(MclError::InvalidParameter { name: "world_size", .. })
        ));
        assert!(matches!(
            ParticleFilter::from_seed(small_config(0), 1),
            Err(MclError::InvalidParameter { name: "num_particles", .. })
        ));
        let mut bad_noise = FilterConfig::default();
        bad_noise.noise.sense_noise = -1.0;
        assert!(matches!(
            ParticleFilter::from_seed(bad_noise, 1),
            Err(MclError::InvalidParameter { name: "sense_noise", .. })
        ));
        let no_landmarks = FilterConfig {
            landmarks: vec![],
            ..FilterConfig::default()
        };
        assert!(ParticleFilter::from_seed(no_landmarks, 1).is_err());
        assert!(ParticleFilter::with_random_seed(small_config(0)).is_err());
        assert_eq!(
            ParticleFilter::with_random_seed(small_config(8)).unwrap().num_particles(),
            8
        );
    }
    #[test]
    fn test_seeded_filters_are_reproducible() {
        let mut a = ParticleFilter::from_seed(small_config(200), 99).unwrap();
        let mut b = ParticleFilter::from_seed(small_config(200), 99).unwrap();
        for _ in 0..3 {
            let wa = a.step(0.1, 5.0).unwrap();
            let wb = b.step(0.1, 5.0).unwrap();
            assert_eq!(wa, wb);
        }
        assert_eq!(a.particles(), b.particles());
        assert_eq!(a.robot(), b.robot());
    }
    #[test]
    fn test_propagate_keeps_invariants() {
        let mut pf = ParticleFilter::from_seed(small_config(200), 3).unwrap();
        for i in 0..50 {
            let turn = if i % 2 == 0 { -2.5 } else { 4.0 };
            pf.propagate(turn, 37.0 - i as f64 * 3.0);
            assert_eq!(pf.num_particles(), 200);
            for p in pf.particles().iter().chain(std::iter::once(&pf.robot())) {
                assert!(p.x >= 0.0 && p.x < 100.0, "x out of range: {}", p.x);
                assert!(p.y >= 0.0 && p.y < 100.0, "y out of range: {}", p.y);
                assert!(p.orientation >= 0.0 && p.orientation < 2.0 * PI);
            }
        }
    }
    #[test]
    fn test_propagate_matches_motion_formula() {
        let mut pf = ParticleFilter::from_seed(FilterConfig::default(), 2024).unwrap();
        let start = pf.robot();
        let mut replay = pf.rng().clone();
        pf.propagate(0.1, 5.0);
        let eps_turn = Normal::new(0.0, 0.05).unwrap().sample(&mut replay);
        let eps_fwd = Normal::new(0.0, 0.05).unwrap().sample(&mut replay);
        let orientation = wrap_to_2pi(start.orientation + 0.1 + eps_turn);
        let expected_x = wrap_to_modulus(start.x + orientation.cos() * (5.0 + eps_fwd), 100.0);
        let expected_y = wrap_to_modulus(start.y + orientation.sin() * (5.0 + eps_fwd), 100.0);
        let robot = pf.robot();
        assert_approx_eq!(robot.orientation, orientation, 1e-12);
        assert_approx_eq!(robot.x, expected_x, 1e-12);
        assert_approx_eq!(robot.y, expected_y, 1e-12);
    }
    #[test]
    fn test_noise_free_motion_wraps() {
        let mut config = small_config(1);
        config.noise.forward_noise = 0.0;
        config.noise.turn_noise = 0.0;
        let mut pf = ParticleFilter::from_seed(config, 0).unwrap();
        pf.set_robot(Pose::new(98.0, 50.0, 0.0));
        pf.propagate(0.0, 5.0);
        assert_approx_eq!(pf.robot().x, 3.0, 1e-9);
        assert_approx_eq!(pf.robot().y, 50.0, 1e-9);
        pf.propagate(PI, 10.0);
        assert_approx_eq!(pf.robot().x, 93.0, 1e-9);
        assert_approx_eq!(pf.robot().orientation, PI, 1e-12);
    }
    #[test]
    fn test_sense_returns_one_weight_per_particle() {
        let mut pf = ParticleFilter::from_seed(small_config(300), 11).unwrap();
        let weights = pf.sense();
        assert_eq!(weights.len(), 300);
        assert!(weights.iter().all(|w| *w >= 0.0));
        assert_eq!(pf.measure().len(), 4);
    }
    #[test]
    fn test_gaussian_likelihood() {
        let sigma: f64 = 5.0;
        let peak = 1.0 / (2.0 * PI * sigma * sigma).sqrt();
        assert_approx_eq!(gaussian_likelihood(0.0, sigma), peak);
        assert_approx_eq!(gaussian_likelihood(5.0, sigma), peak * (-0.5f64).exp());
        assert!(gaussian_likelihood(1.0, sigma) > gaussian_likelihood(2.0, sigma));
        assert_eq!(gaussian_likelihood(0.0, 0.0), 1.0);
        assert_eq!(gaussian_likelihood(0.1, 0.0), 0.0);
    }
    #[test]
    fn test_likelihood_prefers_true_pose() {
        for sense_noise in [0.0, 5.0] {
            let mut config = FilterConfig::default();
            config.noise.sense_noise = sense_noise;
            let mut pf = ParticleFilter::from_seed(config, 5).unwrap();
            pf.set_robot(Pose::new(40.0, 50.0, 1.0));
            let robot = pf.robot();
            let far = Pose::new(robot.x + 50.0, robot.y, robot.orientation);
            let z = pf.measure();
            let weights =
                importance_weights(&[robot, far], pf.landmarks(), &z, sense_noise).unwrap();
            assert!(
                weights[0] > weights[1],
                "sigma {sense_noise}: {} <= {}",
                weights[0],
                weights[1]
            );
        }
    }
    #[test]
    fn test_importance_weights_require_one_range_per_landmark() {
        let landmarks = default_landmarks();
        assert!(matches!(
            importance_weights(&[Pose::default()], &landmarks, &[1.0, 2.0], 5.0),
            Err(MclError::MeasurementLengthMismatch {
                expected: 4,
                actual: 2
            })
        ));
        let pose = Pose::new(30.0, 40.0, 0.0);
        let exact: Vec<f64> = landmarks.iter().map(|l| l.range_from(&pose)).collect();
        let weights = importance_weights(&[pose], &landmarks, &exact, 5.0).unwrap();
        assert_approx_eq!(weights[0], gaussian_likelihood(0.0, 5.0).powi(4));
        assert!(importance_weights(&[], &landmarks, &exact, 5.0).unwrap().is_empty());
    }
    #[test]
    fn test_sense_matches_importance_weights() {
        let mut pf = ParticleFilter::from_seed(small_config(50), 12).unwrap();
        let mut replay = pf.clone();
        let weights = pf.sense();
        let z = replay.measure();
        let expected =
            importance_weights(replay.particles(), replay.landmarks(), &z, replay.noise().sense_noise)
                .unwrap();
        assert_eq!(weights, expected);
    }
    #[test]
    fn test_normalize_weights() {
        let normalized = normalize_weights(&[1.0, 3.0]).unwrap();
        assert_approx_eq!(normalized[0], 0.25);
        assert_approx_eq!(normalized[1], 0.75);
        assert!(matches!(
            normalize_weights(&[0.0, 0.0, 0.0]),
            Err(MclError::DegenerateWeights { .. })
        ));
        assert!(matches!(
            normalize_weights(&[]),
            Err(MclError::DegenerateWeights { .. })
        ));
        assert!(matches!(
            normalize_weights(&[1.0, -0.5]),
            Err(MclError::InvalidWeight { index: 1, .. })
        ));
        assert!(matches!(
            normalize_weights(&[f64::NAN]),
            Err(MclError::InvalidWeight { index: 0, .. })
        ));
    }
    #[test]
    fn test_one_hot_weights_copy_single_particle() {
        let particles = grid(20);
        let mut weights = vec![0.0; 20];
        weights[13] = 1.0;
        let mut rng = StdRng::seed_from_u64(1);
        for strategy in [
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Residual,
        ] {
            let resampled = resample(&particles, &weights, strategy, &mut rng).unwrap();
            assert_eq!(resampled.len(), 20);
            assert!(resampled.iter().all(|p| *p == particles[13]), "{strategy:?}");
        }
    }
    #[test]
    fn test_uniform_weights_select_uniformly() {
        let n = 10;
        let particles = grid(n);
        let weights = vec![0.1; n];
        let mut rng = StdRng::seed_from_u64(8);
        let mut counts = vec![0usize; n];
        let trials = 2000;
        for _ in 0..trials {
            for p in resample(&particles, &weights, ResamplingStrategy::Multinomial, &mut rng).unwrap() {
                counts[p.x as usize] += 1;
            }
        }
        for count in counts {
            let frequency = count as f64 / (trials * n) as f64;
            assert!((frequency - 0.1).abs() < 0.01, "frequency {frequency}");
        }
    }
    #[test]
    fn test_systematic_and_residual_proportions() {
        let particles = grid(4);
        let weights = [0.5, 0.25, 0.25, 0.0];
        let mut rng = StdRng::seed_from_u64(21);
        for strategy in [ResamplingStrategy::Systematic, ResamplingStrategy::Residual] {
            let resampled = resample(&particles, &weights, strategy, &mut rng).unwrap();
            let count = |x: f64| resampled.iter().filter(|p| p.x == x).count();
            assert_eq!(count(0.0), 2, "{strategy:?}");
            assert_eq!(count(1.0), 1, "{strategy:?}");
            assert_eq!(count(2.0), 1, "{strategy:?}");
            assert_eq!(count(3.0), 0, "{strategy:?}");
        }
    }
    #[test]
    fn test_resample_rejects_degenerate_weights() {
        let mut pf = ParticleFilter::from_seed(small_config(5), 4).unwrap();
        let before = pf.particles().to_vec();
        let result = pf.resample(&[0.0; 5]);
        assert!(matches!(result, Err(MclError::DegenerateWeights { .. })));
        assert_eq!(pf.particles(), before.as_slice());
        assert!(matches!(
            pf.resample(&[1.0; 3]),
            Err(MclError::WeightLengthMismatch { expected: 5, actual: 3 })
        ));
    }
    #[test]
    fn test_set_particles_keeps_size() {
        let mut pf = ParticleFilter::from_seed(small_config(3), 4).unwrap();
        assert!(pf.set_particles(grid(2)).is_err());
        pf.set_particles(vec![Pose::new(-1.0, 101.0, -0.5); 3]).unwrap();
        let p = pf.particles()[0];
        assert_approx_eq!(p.x, 99.0);
        assert_approx_eq!(p.y, 1.0);
        assert_approx_eq!(p.orientation, 2.0 * PI - 0.5);
    }
    #[test]
    fn test_estimate_across_world_edge() {
        let mut pf = ParticleFilter::from_seed(small_config(2), 4).unwrap();
        pf.set_particles(vec![Pose::new(99.0, 50.0, 0.1), Pose::new(1.0, 50.0, 2.0 * PI - 0.1)])
            .unwrap();
        let est = pf.estimate();
        assert!(est.pose.x < 1e-6 || est.pose.x > 100.0 - 1e-6, "x = {}", est.pose.x);
        assert_approx_eq!(est.pose.y, 50.0, 1e-9);
        assert!(est.pose.orientation < 1e-9 || est.pose.orientation > 2.0 * PI - 1e-9);
        assert_approx_eq!(est.covariance[(0, 0)], 1.0, 1e-9);
        let weighted = pf.weighted_estimate(&[1.0, 0.0]).unwrap();
        assert_approx_eq!(weighted.pose.x, 99.0, 1e-9);
    }
    #[test]
    fn test_effective_sample_size() {
        assert_approx_eq!(effective_sample_size(&[0.25; 4]), 4.0);
        assert_approx_eq!(effective_sample_size(&[1.0, 0.0, 0.0]), 1.0);
        assert_approx_eq!(effective_sample_size(&[2.0, 2.0]), 2.0);
        assert_eq!(effective_sample_size(&[0.0, 0.0]), 0.0);
    }
    #[test]
    fn test_filter_converges_on_robot() {
        let mut pf = ParticleFilter::from_seed(small_config(3000), 42).unwrap();
        for _ in 0..20 {
            pf.step(0.1, 5.0).unwrap();
        }
        let est = pf.estimate();
        let robot = pf.robot();
        let dx = wrap_to_pi((est.pose.x - robot.x) * 2.0 * PI / 100.0) * 100.0 / (2.0 * PI);
        let dy = wrap_to_pi((est.pose.y - robot.y) * 2.0 * PI / 100.0) * 100.0 / (2.0 * PI);
        assert!(dx.hypot(dy) < 10.0, "estimate {} vs robot {}", est.pose, robot);
    }
    #[test]
    fn test_snapshot_and_reinitialize() {
        let mut pf = ParticleFilter::from_seed(small_config(10), 4).unwrap();
        let snap = pf.snapshot(3);
        assert_eq!(snap.step, 3);
        assert_eq!(snap.particles.len(), 10);
        assert_eq!(snap.landmarks.len(), 4);
        assert_eq!(snap.robot, pf.robot());
        pf.reinitialize();
        assert_eq!(pf.num_particles(), 10);
        assert_ne!(pf.particles(), snap.particles.as_slice());
        assert!(format!("{:?}", pf).contains("num_particles: 10"));
    }
}
