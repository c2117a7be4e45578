//! Odometry drift: an ideal square trajectory against one dead-reckoned from noisy velocity readings.
//!
//! The ideal robot drives the four sides of a square at constant speed and turns instantly at each corner.
//! The "real" robot integrates noisy forward speed and yaw rate readings with a simple Euler step and must
//! make each turn over a finite duration. Nothing ever corrects the integrated pose, so the error grows in
//! an irregular way; it jumps at the corners, where a yaw-rate error swings the direction of every later leg.
use crate::{MclError, Pose, wrap_to_pi};

use csv::Writer;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::path::Path;

/// Upper bound on the integration steps of a single leg or turn.
pub const MAX_SEGMENT_STEPS: usize = 10_000_000;

/// Parameters of the square drive and of the odometry noise.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryParameters {
    /// Commanded forward speed (m/s)
    pub speed: f64,
    /// Integration step (s)
    pub dt: f64,
    /// Side length of the square (m)
    pub side_length: f64,
    /// Time allotted to each 90 degree turn (s)
    pub turn_duration: f64,
    /// Standard deviation of the forward speed reading (m/s)
    pub sigma_v: f64,
    /// Standard deviation of the yaw rate reading (rad/s)
    pub sigma_omega: f64,
}
impl Default for OdometryParameters {
    fn default() -> Self {
        OdometryParameters {
            speed: 1.0,
            dt: 0.1,
            side_length: 2.0,
            turn_duration: 0.5,
            sigma_v: 0.05,
            sigma_omega: 0.02,
        }
    }
}
impl OdometryParameters {
    pub fn validate(&self) -> Result<(), MclError> {
        let positive = [
            ("speed", self.speed),
            ("dt", self.dt),
            ("side_length", self.side_length),
            ("turn_duration", self.turn_duration),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MclError::invalid(
                    name,
                    format!("must be finite and positive, got {value}"),
                ));
            }
        }
        for (name, value) in [("sigma_v", self.sigma_v), ("sigma_omega", self.sigma_omega)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MclError::invalid(
                    name,
                    format!("must be finite and non-negative, got {value}"),
                ));
            }
        }
        for (what, ratio) in [
            ("leg", self.side_length / self.speed / self.dt),
            ("turn", self.turn_duration / self.dt),
        ] {
            if !(ratio.is_finite() && ratio <= MAX_SEGMENT_STEPS as f64) {
                return Err(MclError::invalid(
                    "dt",
                    format!(
                        "each {what} would take {ratio:e} integration steps, the limit is {MAX_SEGMENT_STEPS}"
                    ),
                ));
            }
        }
        Ok(())
    }
    /// Integration steps spent on each straight leg
    pub fn steps_per_side(&self) -> usize {
        (self.side_length / self.speed / self.dt) as usize
    }
    /// Integration steps spent on each turn
    pub fn steps_per_turn(&self) -> usize {
        (self.turn_duration / self.dt) as usize
    }
}

/// Ideal square: four legs with headings 0, π/2, π and -π/2 and instant turns.
///
/// The returned trajectory starts with the origin and has `4 * steps_per_side + 1` poses.
pub fn ideal_square(params: &OdometryParameters) -> Result<Vec<Pose>, MclError> {
    params.validate()?;
    let steps = params.steps_per_side();
    let (mut x, mut y) = (0.0, 0.0);
    let mut trajectory = Vec::with_capacity(4 * steps + 1);
    trajectory.push(Pose::new(x, y, 0.0));
    for heading in [0.0, FRAC_PI_2, PI, -FRAC_PI_2] {
        for _ in 0..steps {
            x += params.speed * params.dt * f64::cos(heading);
            y += params.speed * params.dt * f64::sin(heading);
            trajectory.push(Pose::new(x, y, heading));
        }
    }
    Ok(trajectory)
}

/// Dead-reckoned square from noisy speed and yaw-rate readings.
///
/// Each of the four legs is a straight segment (v + N(0, σ_v), ω = N(0, σ_ω)) followed by a turn segment
/// (v = N(0, σ_v), ω = (π/2) / turn_duration + N(0, σ_ω)). Every Euler step moves along the current heading
/// and then updates the heading. Speed noise is drawn before yaw-rate noise. Headings are not wrapped, so
/// the accumulated rotation stays visible.
pub fn noisy_square<R: Rng>(params: &OdometryParameters, rng: &mut R) -> Result<Vec<Pose>, MclError> {
    params.validate()?;
    let speed_noise = Normal::new(0.0, params.sigma_v)
        .map_err(|e| MclError::invalid("sigma_v", e.to_string()))?;
    let yaw_rate_noise = Normal::new(0.0, params.sigma_omega)
        .map_err(|e| MclError::invalid("sigma_omega", e.to_string()))?;
    let turn_rate = FRAC_PI_2 / params.turn_duration;
    let side_steps = params.steps_per_side();
    let turn_steps = params.steps_per_turn();

    let mut pose = Pose::default();
    let mut trajectory = Vec::with_capacity(4 * (side_steps + turn_steps) + 1);
    trajectory.push(pose);
    let mut integrate = |pose: &mut Pose, v: f64, omega: f64| {
        pose.x += v * params.dt * pose.orientation.cos();
        pose.y += v * params.dt * pose.orientation.sin();
        pose.orientation += omega * params.dt;
        trajectory.push(*pose);
    };
    for _ in 0..4 {
        for _ in 0..side_steps {
            let v = params.speed + speed_noise.sample(rng);
            let omega = yaw_rate_noise.sample(rng);
            integrate(&mut pose, v, omega);
        }
        for _ in 0..turn_steps {
            let v = speed_noise.sample(rng);
            let omega = turn_rate + yaw_rate_noise.sample(rng);
            integrate(&mut pose, v, omega);
        }
    }
    Ok(trajectory)
}

/// Euclidean position error between two trajectories over their common prefix.
pub fn position_errors(ideal: &[Pose], noisy: &[Pose]) -> Vec<f64> {
    ideal
        .iter()
        .zip(noisy.iter())
        .map(|(a, b)| a.distance_to(b))
        .collect()
}

/// Ideal and dead-reckoned trajectories together with their error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DriftResult {
    pub ideal: Vec<Pose>,
    pub noisy: Vec<Pose>,
    /// Position error at each index of the common prefix
    pub errors: Vec<f64>,
    pub dt: f64,
}
/// One row of the drift CSV.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub time_s: f64,
    pub ideal_x: f64,
    pub ideal_y: f64,
    pub noisy_x: f64,
    pub noisy_y: f64,
    pub heading_error_rad: f64,
    pub position_error_m: f64,
}
impl DriftResult {
    /// Largest position error over the run (zero for an empty run)
    pub fn max_error(&self) -> f64 {
        self.errors.iter().copied().fold(0.0, f64::max)
    }
    pub fn final_error(&self) -> Option<f64> {
        self.errors.last().copied()
    }
    pub fn records(&self) -> Vec<DriftRecord> {
        self.ideal
            .iter()
            .zip(self.noisy.iter())
            .zip(self.errors.iter())
            .enumerate()
            .map(|(i, ((ideal, noisy), &error))| DriftRecord {
                time_s: i as f64 * self.dt,
                ideal_x: ideal.x,
                ideal_y: ideal.y,
                noisy_x: noisy.x,
                noisy_y: noisy.y,
                heading_error_rad: wrap_to_pi(noisy.orientation - ideal.orientation),
                position_error_m: error,
            })
            .collect()
    }
    /// Write the common prefix of both trajectories and the error to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), MclError> {
        let mut writer = Writer::from_path(path)?;
        for record in self.records() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Run both trajectories and compute the drift.
pub fn simulate_drift<R: Rng>(params: &OdometryParameters, rng: &mut R) -> Result<DriftResult, MclError> {
    let ideal = ideal_square(params)?;
    let noisy = noisy_square(params, rng)?;
    let errors = position_errors(&ideal, &noisy);
    Ok(DriftResult {
        ideal,
        noisy,
        errors,
        dt: params.dt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_step_counts() {
        let params = OdometryParameters::default();
        assert_eq!(params.steps_per_side(), 20);
        assert_eq!(params.steps_per_turn(), 5);
    }
    #[test]
    fn test_ideal_square_closes() {
        let params = OdometryParameters {
            dt: 0.125,
            ..OdometryParameters::default()
        };
        let trajectory = ideal_square(&params).unwrap();
        assert_eq!(trajectory.len(), 4 * 16 + 1);
        let corner = trajectory[16];
        assert_approx_eq!(corner.x, 2.0, 1e-9);
        assert_approx_eq!(corner.y, 0.0, 1e-9);
        let end = trajectory.last().unwrap();
        assert_approx_eq!(end.x, 0.0, 1e-9);
        assert_approx_eq!(end.y, 0.0, 1e-9);
    }
    #[test]
    fn test_noisy_square_without_noise_closes() {
        let params = OdometryParameters {
            dt: 0.125,
            sigma_v: 0.0,
            sigma_omega: 0.0,
            ..OdometryParameters::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let trajectory = noisy_square(&params, &mut rng).unwrap();
        assert_eq!(trajectory.len(), 4 * (16 + 4) + 1);
        let end = trajectory.last().unwrap();
        assert_approx_eq!(end.x, 0.0, 1e-9);
        assert_approx_eq!(end.y, 0.0, 1e-9);
        assert_approx_eq!(end.orientation, 2.0 * PI, 1e-9);
    }
    #[test]
    fn test_position_errors() {
        let a = vec![Pose::new(0.0, 0.0, 0.0), Pose::new(1.0, 0.0, 0.0), Pose::new(2.0, 0.0, 0.0)];
        let b = vec![Pose::new(0.0, 0.0, 0.0), Pose::new(1.0, 1.0, 0.0)];
        let errors = position_errors(&a, &b);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], 0.0);
        assert_approx_eq!(errors[1], 1.0);
    }
    #[test]
    fn test_simulated_drift() {
        let mut rng = StdRng::seed_from_u64(12);
        let result = simulate_drift(&OdometryParameters::default(), &mut rng).unwrap();
        assert_eq!(result.ideal.len(), 81);
        assert_eq!(result.noisy.len(), 101);
        assert_eq!(result.errors.len(), 81);
        assert_eq!(result.errors[0], 0.0);
        assert!(result.max_error() > 0.0);
        assert_eq!(result.records().len(), 81);
        assert_approx_eq!(result.records()[10].time_s, 1.0);
    }
    #[test]
    fn test_invalid_parameters() {
        let mut rng = StdRng::seed_from_u64(0);
        let params = OdometryParameters {
            speed: 0.0,
            ..OdometryParameters::default()
        };
        assert!(matches!(
            ideal_square(&params),
            Err(MclError::InvalidParameter { name: "speed", .. })
        ));
        let params = OdometryParameters {
            sigma_omega: -1.0,
            ..OdometryParameters::default()
        };
        assert!(noisy_square(&params, &mut rng).is_err());
    }
    #[test]
    fn test_step_count_limit() {
        let mut rng = StdRng::seed_from_u64(0);
        let tiny_dt = OdometryParameters {
            dt: 1e-300,
            ..OdometryParameters::default()
        };
        assert!(matches!(
            tiny_dt.validate(),
            Err(MclError::InvalidParameter { name: "dt", .. })
        ));
        assert!(matches!(
            ideal_square(&tiny_dt),
            Err(MclError::InvalidParameter { name: "dt", .. })
        ));
        assert!(noisy_square(&tiny_dt, &mut rng).is_err());
        assert!(simulate_drift(&tiny_dt, &mut rng).is_err());
        let huge_side = OdometryParameters {
            side_length: 1e300,
            ..OdometryParameters::default()
        };
        assert!(matches!(
            ideal_square(&huge_side),
            Err(MclError::InvalidParameter { name: "dt", .. })
        ));
        let long_turn = OdometryParameters {
            turn_duration: 1e12,
            ..OdometryParameters::default()
        };
        assert!(noisy_square(&long_turn, &mut rng).is_err());
        let fine_step = OdometryParameters {
            dt: 1e-6,
            ..OdometryParameters::default()
        };
        assert!(fine_step.validate().is_ok());
        assert!(fine_step.steps_per_side() <= MAX_SEGMENT_STEPS);
    }
    #[test]
    fn test_drift_to_csv() {
        let mut rng = StdRng::seed_from_u64(1);
        let result = simulate_drift(&OdometryParameters::default(), &mut rng).unwrap();
        let path = std::env::temp_dir().join("mcl_drift_test.csv");
        result.to_csv(&path).expect("Failed to write CSV");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("time_s,ideal_x,ideal_y"));
        assert_eq!(contents.lines().count(), 82);
        let _ = std::fs::remove_file(&path);
    }
}
