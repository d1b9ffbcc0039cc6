use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::ParameterError;

/// Coarse classification of pipeline failures, one per user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed parameter or failure writing the engine input.
    Serialization,
    /// Engine binary missing or not executable.
    Launch,
    /// Engine exceeded the configured deadline and was killed.
    Timeout,
    /// Engine ran but its output could not be collected.
    Capture,
    /// Engine reported an internal abort.
    SimulationFailure,
    /// Data file missing or malformed at plot time.
    DataFile,
    /// Plotting or image encoding failed.
    Render,
    /// Another run holds the artifact paths.
    Busy,
    /// Session operations were called out of order.
    Sequence,
}

/// Errors surfaced by the simulation pipeline.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineError {
    /// A parameter could not be coerced.
    #[error("invalid parameter: {0}")]
    Parameter(#[from] ParameterError),
    /// Writing the engine input (or preparing its directory) failed.
    #[error("failed to write engine input {}: {message}", .path.display())]
    InputWrite {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        message: String,
    },
    /// The engine process could not be started.
    #[error("failed to launch engine {}: {message}", .program.display())]
    Launch {
        /// Program that was launched.
        program: PathBuf,
        /// Underlying spawn error.
        message: String,
    },
    /// The engine did not exit before the deadline.
    #[error("engine (pid {pid:?}) did not finish within {after:?}")]
    Timeout {
        /// Child process id, for diagnosing hangs.
        pid: Option<u32>,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// Waiting on the engine or reading its pipes failed.
    #[error("failed to collect engine output (pid {pid:?}): {message}")]
    Capture {
        /// Child process id.
        pid: Option<u32>,
        /// Underlying I/O error.
        message: String,
    },
    /// The engine emitted its abort sentinel; nothing can be plotted.
    #[error("engine reported an internal abort")]
    SimulationFailed,
    /// The tabular data file could not be used.
    #[error("data file {}: {message}", .path.display())]
    DataFile {
        /// Data file path.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },
    /// Drawing or encoding the diagram failed.
    #[error("rendering failed: {0}")]
    Render(String),
    /// A run is already in flight and the busy policy rejects waiting.
    #[error("a simulation run is already in progress")]
    Busy,
    /// A session stage was invoked out of order.
    #[error("pipeline stage out of order: {0}")]
    Sequence(String),
}

impl PipelineError {
    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parameter(_) | Self::InputWrite { .. } => ErrorKind::Serialization,
            Self::Launch { .. } => ErrorKind::Launch,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Capture { .. } => ErrorKind::Capture,
            Self::SimulationFailed => ErrorKind::SimulationFailure,
            Self::DataFile { .. } => ErrorKind::DataFile,
            Self::Render(_) => ErrorKind::Render,
            Self::Busy => ErrorKind::Busy,
            Self::Sequence(_) => ErrorKind::Sequence,
        }
    }

    /// Message suitable for the requesting user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Parameter(err) => format!("Invalid parameter: {err}."),
            Self::InputWrite { message, .. } => {
                format!("Could not prepare the simulation input: {message}.")
            }
            Self::Launch { message, .. } => {
                format!("The simulation engine could not be started: {message}.")
            }
            Self::Timeout { after, .. } => format!(
                "The simulation did not finish within {} s and was stopped.",
                after.as_secs_f64()
            ),
            Self::Capture { message, .. } => {
                format!("The simulation output could not be collected: {message}.")
            }
            Self::SimulationFailed => {
                "The simulation aborted; see the log for the engine's message.".to_string()
            }
            Self::DataFile { message, .. } => {
                format!("The simulation data could not be read for plotting: {message}.")
            }
            Self::Render(message) => format!("The diagram could not be rendered: {message}."),
            Self::Busy => "Another simulation is running; please try again shortly.".to_string(),
            Self::Sequence(message) => format!("Internal pipeline error: {message}."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_distinct_message() {
        let errors = [
            PipelineError::Parameter(ParameterError::Unknown("foo".into())),
            PipelineError::Launch {
                program: "./sse".into(),
                message: "No such file or directory".into(),
            },
            PipelineError::Timeout {
                pid: Some(42),
                after: Duration::from_secs(5),
            },
            PipelineError::Capture {
                pid: None,
                message: "broken pipe".into(),
            },
            PipelineError::SimulationFailed,
            PipelineError::DataFile {
                path: "evolve.dat".into(),
                message: "empty".into(),
            },
            PipelineError::Render("bad range".into()),
            PipelineError::Busy,
        ];
        let mut messages: Vec<_> = errors.iter().map(PipelineError::user_message).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn input_and_parameter_errors_share_the_serialization_kind() {
        let write = PipelineError::InputWrite {
            path: "evolve.in".into(),
            message: "permission denied".into(),
        };
        assert_eq!(write.kind(), ErrorKind::Serialization);
        let param = PipelineError::from(ParameterError::Unknown("x".into()));
        assert_eq!(param.kind(), ErrorKind::Serialization);
        assert_eq!(PipelineError::Busy.kind(), ErrorKind::Busy);
    }
}
