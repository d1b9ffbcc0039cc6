use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tracing::warn;
use uuid::Uuid;

/// Telemetry builder for the pipeline.
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetryBuilder {
    /// Creates a builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the stage event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds telemetry, opening the log file if one was set.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = self.log_path.map(JsonLogger::new).transpose()?;
        Ok(PipelineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Cloneable handle recording pipeline stages to the log and event sinks.
#[derive(Clone)]
pub struct PipelineTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.inner.module)
            .field("logging", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

impl Default for PipelineTelemetry {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Telemetry with no sinks.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: "sse-pipeline".into(),
                logger: None,
                publisher: None,
            }),
        }
    }

    /// Logs a stage and publishes it as an event. Sink failures are reported, never raised.
    pub async fn stage(&self, run_id: Uuid, level: LogLevel, event_type: &str, payload: Value) {
        let run = run_id.to_string();
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, event_type)
                .with_run(run.clone())
                .with_metadata(payload.clone());
            if let Err(err) = logger.log(&record) {
                warn!(%err, event_type, "pipeline log write failed");
            }
        }
        if let Some(publisher) = &self.inner.publisher {
            let event = EventRecord::new(&self.inner.module, event_type, Some(run), payload);
            if let Err(err) = publisher.publish(event).await {
                warn!(%err, event_type, "pipeline event publish failed");
            }
        }
    }
}
