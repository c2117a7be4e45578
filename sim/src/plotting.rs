//! Plotting module for the localization, belief and odometry simulations.
//!
//! Each function renders one result type to a PNG file with `plotters`.

use mcl::motion::BeliefHistory;
use mcl::odometry::DriftResult;
use mcl::particle::FilterSnapshot;
use mcl::sim::StepRecord;
use plotters::prelude::*;
use std::error::Error;
use std::ops::Range;
use std::path::Path;

/// Axis range covering `values` with a relative margin on both sides.
///
/// Degenerate inputs (empty or constant) fall back to a unit-wide range around the data.
pub fn padded_range<I: IntoIterator<Item = f64>>(values: I, margin: f64) -> Range<f64> {
    let (min, max) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if min > max {
        return -1.0..1.0;
    }
    let span = max - min;
    if span == 0.0 {
        return (min - 1.0)..(max + 1.0);
    }
    (min - margin * span)..(max + margin * span)
}

/// File stem of the particle plot for one filter step, zero-padded so the files sort by step.
pub fn snapshot_file_stem(step: usize) -> String {
    format!("particles_step_{step:02}")
}

/// Draw the world, the landmarks, the particle cloud and the true robot position of one snapshot.
pub fn plot_snapshot(snapshot: &FilterSnapshot, output_path: &Path) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(output_path, (800, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let w = snapshot.world_size;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Particle filter, step {}", snapshot.step),
            ("sans-serif", 20).into_font(),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..w, 0.0..w)?;

    chart.configure_mesh().x_desc("x").y_desc("y").draw()?;

    chart
        .draw_series(
            snapshot
                .particles
                .iter()
                .map(|p| Circle::new((p.x, p.y), 2, RED.mix(0.3).filled())),
        )?
        .label("Particles")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, RED.filled()));

    chart
        .draw_series(
            snapshot
                .landmarks
                .iter()
                .map(|l| Circle::new((l.x, l.y), 8, BLUE.filled())),
        )?
        .label("Landmarks")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, BLUE.filled()));

    let robot = snapshot.robot;
    let heading = (
        robot.x + 0.04 * w * robot.orientation.cos(),
        robot.y + 0.04 * w * robot.orientation.sin(),
    );
    chart.draw_series(LineSeries::new(vec![(robot.x, robot.y), heading], &GREEN))?;
    chart
        .draw_series(std::iter::once(Circle::new(
            (robot.x, robot.y),
            6,
            GREEN.filled(),
        )))?
        .label("Robot")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, GREEN.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Position error and effective sample size over the steps of a localization run.
pub fn plot_localization_error(records: &[StepRecord], output_path: &Path) -> Result<(), Box<dyn Error>> {
    if records.is_empty() {
        return Err("No data points to plot".into());
    }
    let root = BitMapBackend::new(output_path, (1200, 400)).into_drawing_area();
    root.fill(&WHITE)?;
    let (left, right) = root.split_horizontally(600);

    let last_step = records.len() as f64;
    let max_error = records
        .iter()
        .map(|r| r.position_error)
        .fold(0.0f64, f64::max);
    let mut chart = ChartBuilder::on(&left)
        .caption("Position error", ("sans-serif", 16).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..last_step, 0.0..(max_error * 1.1).max(1.0))?;
    chart.configure_mesh().x_desc("Step").y_desc("Error").draw()?;
    chart.draw_series(LineSeries::new(
        records.iter().map(|r| (r.step as f64, r.position_error)),
        &RED,
    ))?;
    chart.draw_series(
        records
            .iter()
            .filter(|r| r.degenerate)
            .map(|r| Cross::new((r.step as f64, r.position_error), 5, BLACK)),
    )?;

    let max_ess = records
        .iter()
        .map(|r| r.effective_sample_size)
        .fold(0.0f64, f64::max);
    let mut chart = ChartBuilder::on(&right)
        .caption("Effective sample size", ("sans-serif", 16).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..last_step, 0.0..(max_ess * 1.1).max(1.0))?;
    chart.configure_mesh().x_desc("Step").y_desc("ESS").draw()?;
    chart.draw_series(LineSeries::new(
        records
            .iter()
            .map(|r| (r.step as f64, r.effective_sample_size)),
        &BLUE,
    ))?;

    root.present()?;
    Ok(())
}

/// Every recorded particle cloud of a belief run, one color per step, with the noise free path on top.
pub fn plot_belief(history: &BeliefHistory, output_path: &Path) -> Result<(), Box<dyn Error>> {
    if history.is_empty() {
        return Err("No data points to plot".into());
    }
    let root = BitMapBackend::new(output_path, (900, 900)).into_drawing_area();
    root.fill(&WHITE)?;

    let all_points = || {
        history
            .particle_sets
            .iter()
            .flatten()
            .chain(history.true_path.iter())
    };
    let x_range = padded_range(all_points().map(|p| p.x), 0.05);
    let y_range = padded_range(all_points().map(|p| p.y), 0.05);

    let mut chart = ChartBuilder::on(&root)
        .caption("Sampled belief under the motion model", ("sans-serif", 20).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)?;
    chart.configure_mesh().x_desc("x").y_desc("y").draw()?;

    for (step, cloud) in history.particle_sets.iter().enumerate() {
        let color = Palette99::pick(step).mix(0.4);
        chart
            .draw_series(cloud.iter().map(|p| Circle::new((p.x, p.y), 1, color.filled())))?
            .label(format!("Step {step}"))
            .legend(move |(x, y)| Circle::new((x + 10, y), 3, color.filled()));
    }

    chart
        .draw_series(LineSeries::new(
            history.true_path.iter().map(|p| (p.x, p.y)),
            BLACK.stroke_width(2),
        ))?
        .label("True path")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Ideal and dead-reckoned squares on the left, position error against time on the right.
pub fn plot_drift(result: &DriftResult, output_path: &Path) -> Result<(), Box<dyn Error>> {
    if result.errors.is_empty() {
        return Err("No data points to plot".into());
    }
    let root = BitMapBackend::new(output_path, (1200, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (left, right) = root.split_horizontally(600);

    let points = || result.ideal.iter().chain(result.noisy.iter());
    let x_range = padded_range(points().map(|p| p.x), 0.1);
    let y_range = padded_range(points().map(|p| p.y), 0.1);
    let mut chart = ChartBuilder::on(&left)
        .caption("Trajectories", ("sans-serif", 16).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)?;
    chart.configure_mesh().x_desc("x (m)").y_desc("y (m)").draw()?;
    chart
        .draw_series(LineSeries::new(
            result.ideal.iter().map(|p| (p.x, p.y)),
            &BLUE,
        ))?
        .label("Ideal")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(LineSeries::new(
            result.noisy.iter().map(|p| (p.x, p.y)),
            &RED,
        ))?
        .label("Odometry")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    let records = result.records();
    let max_time = records.last().map(|r| r.time_s).unwrap_or(0.0).max(result.dt);
    let mut chart = ChartBuilder::on(&right)
        .caption("Position error", ("sans-serif", 16).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..max_time, 0.0..(result.max_error() * 1.1).max(1e-3))?;
    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Error (m)")
        .draw()?;
    chart.draw_series(LineSeries::new(
        records.iter().map(|r| (r.time_s, r.position_error_m)),
        &RED,
    ))?;

    root.present()?;
    Ok(())
}
