use std::path::{Path, PathBuf};

use plotters::prelude::*;
use serde::{Deserialize, Serialize};

use super::{bounds::PlotBounds, datafile::EvolutionTrack, PlotError};

/// Outcome of a successful render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPlot {
    /// Image file written.
    pub path: PathBuf,
    /// Temperature axis range actually drawn.
    pub x_range: (f64, f64),
    /// Luminosity axis range actually drawn.
    pub y_range: (f64, f64),
    /// Number of track points.
    pub points: usize,
}

/// Draws the HR diagram of a track as an SVG image.
///
/// Teff increases left to right, unlike the astronomical convention of hot stars on the
/// left; axis ranges are always reported as `(min, max)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotRenderer {
    width: u32,
    height: u32,
    title: String,
}

impl Default for PlotRenderer {
    fn default() -> Self {
        Self::new(800, 600, "Hertzsprung-Russell diagram")
    }
}

impl PlotRenderer {
    /// Creates a renderer with the image size in pixels.
    #[must_use]
    pub fn new(width: u32, height: u32, title: impl Into<String>) -> Self {
        Self {
            width,
            height,
            title: title.into(),
        }
    }

    /// Axis ranges the diagram will use for `track` under `bounds`.
    pub fn axis_ranges(
        track: &EvolutionTrack,
        bounds: &PlotBounds,
    ) -> Result<((f64, f64), (f64, f64)), PlotError> {
        let points = track.hr_points();
        let (x_min, x_max) = extent(points.iter().map(|p| p.0));
        let (y_min, y_max) = extent(points.iter().map(|p| p.1));
        let x_range = bounds.x.resolve(x_min, x_max);
        let y_range = bounds.y.resolve(y_min, y_max);
        check_log_range("temperature", x_range)?;
        check_log_range("luminosity", y_range)?;
        Ok((x_range, y_range))
    }

    /// Renders the diagram to `out`, replacing any existing file.
    ///
    /// Performs blocking file I/O; call it from a blocking context.
    pub fn render(
        &self,
        track: &EvolutionTrack,
        bounds: &PlotBounds,
        out: &Path,
    ) -> Result<RenderedPlot, PlotError> {
        let (x_range, y_range) = Self::axis_ranges(track, bounds)?;
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| PlotError::Render(err.to_string()))?;
        }
        let points = track.hr_points();
        self.draw(&points, x_range, y_range, out)
            .map_err(|err| PlotError::Render(err.to_string()))?;
        Ok(RenderedPlot {
            path: out.to_path_buf(),
            x_range,
            y_range,
            points: points.len(),
        })
    }

    fn draw(
        &self,
        points: &[(f64, f64)],
        x_range: (f64, f64),
        y_range: (f64, f64),
        out: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let root = SVGBackend::new(out, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&self.title, ("sans-serif", 22).into_font())
            .margin(16)
            .x_label_area_size(48)
            .y_label_area_size(64)
            .build_cartesian_2d(
                (x_range.0..x_range.1).log_scale(),
                (y_range.0..y_range.1).log_scale(),
            )?;

        chart
            .configure_mesh()
            .x_desc("Teff [K]")
            .y_desc("L [Lsun]")
            .draw()?;

        chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
        let ends = [points.first(), points.last()];
        chart.draw_series(
            ends.into_iter()
                .flatten()
                .map(|point| Circle::new(*point, 4, RED.filled())),
        )?;

        root.present()?;
        Ok(())
    }
}

fn extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn check_log_range(axis: &str, (min, max): (f64, f64)) -> Result<(), PlotError> {
    if min > 0.0 && min < max && max.is_finite() {
        Ok(())
    } else {
        Err(PlotError::Render(format!(
            "{axis} axis range {min}..{max} is not usable on a log scale"
        )))
    }
}
