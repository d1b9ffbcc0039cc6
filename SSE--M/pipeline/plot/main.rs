//! Hertzsprung-Russell diagram rendering from the engine's data file.

/// Axis bound parsing and resolution.
pub mod bounds;
/// Data file parsing.
pub mod datafile;
/// Diagram drawing.
pub mod render;

use std::path::PathBuf;

use thiserror::Error;

use crate::errors::PipelineError;

pub use bounds::{AxisBounds, BoundsParseError, PlotBounds};
pub use datafile::{EvolutionTrack, TrackRow};
pub use render::{PlotRenderer, RenderedPlot};

/// Plotting failures. Data problems are kept apart from drawing problems.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlotError {
    /// Data file missing or malformed.
    #[error("data file {}: {message}", .path.display())]
    DataFile {
        /// Data file path.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },
    /// Drawing or encoding failed.
    #[error("render failed: {0}")]
    Render(String),
}

impl From<PlotError> for PipelineError {
    fn from(err: PlotError) -> Self {
        match err {
            PlotError::DataFile { path, message } => Self::DataFile { path, message },
            PlotError::Render(message) => Self::Render(message),
        }
    }
}
