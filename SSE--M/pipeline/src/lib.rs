#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Single-star evolution pipeline: parameters in, engine log and HR diagram out.

/// Engine parameters, defaults and coercion.
#[path = "../params.rs"]
pub mod params;

/// Engine input file layout.
#[path = "../serializer.rs"]
pub mod serializer;

/// External engine process execution.
#[path = "../runner.rs"]
pub mod runner;

/// Success/failure policy over captured output.
#[path = "../classifier.rs"]
pub mod classifier;

/// Artifact naming and isolation.
#[path = "../artifacts.rs"]
pub mod artifacts;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Error taxonomy.
#[path = "../errors.rs"]
pub mod errors;

/// Telemetry helpers for pipeline stages.
#[path = "../helper.rs"]
pub mod helper;

/// Data file parsing and diagram rendering.
#[path = "../plot/main.rs"]
pub mod plot;

/// Run admission, staged sessions and whole-request execution.
#[path = "../main.rs"]
pub mod runtime;

/// Prelude exports for front ends driving the pipeline.
pub mod prelude {
    pub use crate::artifacts::{ArtifactLocator, ArtifactPaths, IsolationMode};
    pub use crate::classifier::{OutcomeClassifier, SentinelClassifier, Verdict};
    pub use crate::config::{BusyPolicy, PipelineConfig};
    pub use crate::errors::{ErrorKind, PipelineError};
    pub use crate::helper::{PipelineTelemetry, PipelineTelemetryBuilder};
    pub use crate::params::{Field, FieldValue, ParameterError, ParameterSet};
    pub use crate::plot::{AxisBounds, PlotBounds, PlotRenderer, RenderedPlot};
    pub use crate::runner::{RunResult, SimulationRunner};
    pub use crate::runtime::{
        RequestKind, RunReport, RunRequest, RunSession, SessionStage, SimulationPipeline,
        SimulationPipelineBuilder,
    };
}
