//! Monte Carlo Localization toolbox for planar mobile robots
//!
//! This crate provides a small set of tools for experimenting with probabilistic localization of a mobile
//! robot moving on a plane. The centerpiece is a particle filter (Monte Carlo Localization) that tracks a
//! simulated robot in a square, toroidal world using noisy range measurements to a fixed set of landmarks.
//! Two companion exercises round out the crate: an open-loop sampling approximation of the position belief
//! under a noisy motion model, and an odometry drift study comparing an ideal trajectory with one integrated
//! from noisy velocity and yaw-rate readings.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides points, distances and the covariance matrices of the estimators.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provide the random
//!   sources and distributions used for motion noise, measurement noise and resampling.
//!
//! All other functionality is built on top of these crates or is auxiliary functionality (e.g. configuration and
//! CSV I/O in [sim]).
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [particle]: The particle filter, importance weighting, normalization and resampling strategies.
//! - [motion]: The sampling motion model on the unbounded plane and belief propagation through a command list.
//! - [odometry]: Ideal and noisy square trajectories and the resulting drift error.
//! - [sim]: Configuration, simulation drivers and CSV output used by the `mcl-sim` command line tool.
//!
//! ## Coordinate and state definitions
//!
//! A robot pose is the three-element state
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are planar coordinates and $\theta$ is the heading in radians measured counter-clockwise
//! from the x-axis. Inside the particle filter the world is a square of side $W$ that wraps around on itself, so
//! every update keeps $p_x, p_y \in [0, W)$ and $\theta \in [0, 2\pi)$. The [motion] and [odometry] exercises
//! run on the unbounded plane and only wrap the heading.
//!
//! ## Randomness
//!
//! No function in this crate touches a global random generator. Every stochastic routine either owns its random
//! source (the [particle::ParticleFilter] is generic over any [`rand::Rng`]) or takes one by mutable reference,
//! so that seeded [`rand::rngs::StdRng`] instances reproduce a run exactly.
pub mod motion;
pub mod odometry;
pub mod particle;
pub mod sim;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Display};
use thiserror::Error;

/// Errors raised by the localization routines.
#[derive(Debug, Error)]
pub enum MclError {
    /// A constructor or routine was handed a parameter outside its valid range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// Every importance weight vanished (or the sum was not finite), so no
    /// probability distribution can be formed from them.
    #[error("degenerate weight distribution (weight sum = {sum})")]
    DegenerateWeights { sum: f64 },
    /// An individual weight was negative or not a number.
    #[error("invalid weight {value} at index {index}")]
    InvalidWeight { index: usize, value: f64 },
    #[error("expected {expected} weights, got {actual}")]
    WeightLengthMismatch { expected: usize, actual: usize },
    /// Range measurements and landmarks do not pair up one to one.
    #[error("expected {expected} range measurements (one per landmark), got {actual}")]
    MeasurementLengthMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl MclError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        MclError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Planar robot pose: position and heading.
///
/// Headings are in radians, counter-clockwise from the x-axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub orientation: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.3}, y: {:.3}, orientation: {:.2} deg }}",
            self.x,
            self.y,
            self.orientation.to_degrees()
        )
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, orientation: f64) -> Pose {
        Pose { x, y, orientation }
    }
    /// Position of the pose as a nalgebra point
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
    /// Euclidean distance between the positions of two poses (headings are ignored)
    pub fn distance_to(&self, other: &Pose) -> f64 {
        nalgebra::distance(&self.position(), &other.position())
    }
}
impl From<(f64, f64, f64)> for Pose {
    fn from(tuple: (f64, f64, f64)) -> Self {
        Pose::new(tuple.0, tuple.1, tuple.2)
    }
}
impl From<Pose> for Vec<f64> {
    fn from(pose: Pose) -> Self {
        vec![pose.x, pose.y, pose.orientation]
    }
}

/// A fixed, known point used as the reference for range measurements.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}
impl Landmark {
    pub fn new(x: f64, y: f64) -> Landmark {
        Landmark { x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
    /// Exact (noise free) range from a pose to this landmark
    pub fn range_from(&self, pose: &Pose) -> f64 {
        nalgebra::distance(&self.position(), &pose.position())
    }
}
impl From<(f64, f64)> for Landmark {
    fn from(tuple: (f64, f64)) -> Self {
        Landmark::new(tuple.0, tuple.1)
    }
}

/// The four landmarks of the 100 x 100 course world.
pub fn default_landmarks() -> Vec<Landmark> {
    vec![
        Landmark::new(20.0, 20.0),
        Landmark::new(80.0, 80.0),
        Landmark::new(20.0, 80.0),
        Landmark::new(80.0, 20.0),
    ]
}

/// Wrap a value into the half-open interval `[0, modulus)`.
///
/// `rem_euclid` can round a tiny negative input up to exactly `modulus`; that case is folded back to zero so
/// the upper bound stays exclusive.
///
/// # Example
/// ```rust
/// use mcl::wrap_to_modulus;
/// assert_eq!(wrap_to_modulus(105.0, 100.0), 5.0);
/// assert_eq!(wrap_to_modulus(-5.0, 100.0), 95.0);
/// ```
pub fn wrap_to_modulus(value: f64, modulus: f64) -> f64 {
    let wrapped = value.rem_euclid(modulus);
    if wrapped >= modulus { 0.0 } else { wrapped }
}
/// Wrap an angle to the range $[0, 2\pi)$ radians
///
/// # Example
/// ```rust
/// use mcl::wrap_to_2pi;
/// use std::f64::consts::PI;
/// assert!((wrap_to_2pi(5.0 * PI) - PI).abs() < 1e-12);
/// assert_eq!(wrap_to_2pi(2.0 * PI), 0.0);
/// ```
pub fn wrap_to_2pi(angle: f64) -> f64 {
    wrap_to_modulus(angle, 2.0 * PI)
}
/// Wrap an angle to the range $[-\pi, \pi)$ radians
///
/// # Example
/// ```rust
/// use mcl::wrap_to_pi;
/// use std::f64::consts::PI;
/// assert!((wrap_to_pi(1.5 * PI) + 0.5 * PI).abs() < 1e-12);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    wrap_to_modulus(angle + PI, 2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_wrap_to_modulus() {
        assert_eq!(wrap_to_modulus(0.0, 100.0), 0.0);
        assert_eq!(wrap_to_modulus(100.0, 100.0), 0.0);
        assert_eq!(wrap_to_modulus(250.0, 100.0), 50.0);
        assert_approx_eq!(wrap_to_modulus(-0.5, 100.0), 99.5);
        // -1e-18 rem_euclid 100 rounds to 100.0
        let tiny = wrap_to_modulus(-1e-18, 100.0);
        assert!((0.0..100.0).contains(&tiny));
    }
    #[test]
    fn test_wrap_to_2pi() {
        assert_approx_eq!(wrap_to_2pi(7.0 * PI), PI);
        assert_approx_eq!(wrap_to_2pi(-5.0 * PI), PI);
        assert_eq!(wrap_to_2pi(0.0), 0.0);
        assert_eq!(wrap_to_2pi(2.0 * PI), 0.0);
        assert_approx_eq!(wrap_to_2pi(-0.1), 2.0 * PI - 0.1);
    }
    #[test]
    fn test_wrap_to_pi() {
        assert_approx_eq!(wrap_to_pi(3.0 * PI / 2.0), -PI / 2.0);
        assert_approx_eq!(wrap_to_pi(-3.0 * PI / 2.0), PI / 2.0);
        assert_eq!(wrap_to_pi(0.0), 0.0);
    }
    #[test]
    fn test_pose_distance() {
        let a = Pose::new(0.0, 0.0, 0.0);
        let b = Pose::new(3.0, 4.0, 1.0);
        assert_approx_eq!(a.distance_to(&b), 5.0);
        assert_approx_eq!(b.distance_to(&a), 5.0);
    }
    #[test]
    fn test_landmark_range() {
        let landmark = Landmark::new(20.0, 20.0);
        let pose = Pose::new(20.0, 70.0, 0.3);
        assert_approx_eq!(landmark.range_from(&pose), 50.0);
    }
    #[test]
    fn test_default_landmarks() {
        let landmarks = default_landmarks();
        assert_eq!(landmarks.len(), 4);
        assert!(landmarks.contains(&Landmark::new(80.0, 20.0)));
    }
    #[test]
    fn test_pose_conversions() {
        let pose = Pose::from((1.0, 2.0, 0.5));
        let v: Vec<f64> = pose.into();
        assert_eq!(v, vec![1.0, 2.0, 0.5]);
        assert!(format!("{}", pose).contains("x: 1.000"));
    }
    #[test]
    fn test_error_display() {
        let err = MclError::DegenerateWeights { sum: 0.0 };
        assert!(err.to_string().contains("degenerate"));
        let err = MclError::invalid("world_size", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid parameter `world_size`: must be positive"
        );
    }
}
