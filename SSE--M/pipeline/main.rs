use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use uuid::Uuid;

use crate::{
    artifacts::{ArtifactLocator, ArtifactPaths},
    classifier::{OutcomeClassifier, SentinelClassifier, Verdict},
    config::{BusyPolicy, PipelineConfig},
    errors::PipelineError,
    helper::PipelineTelemetry,
    params::ParameterSet,
    plot::{EvolutionTrack, PlotBounds, PlotRenderer, RenderedPlot},
    runner::{RunResult, SimulationRunner},
    serializer,
};

/// What a request asks for besides the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Log plus the engine's data file.
    Evolve,
    /// Log plus a rendered HR diagram.
    Plot(PlotBounds),
}

/// One user request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Run identifier, fixed before admission so failed runs stay traceable.
    pub run_id: Uuid,
    /// Engine inputs.
    pub params: ParameterSet,
    /// Requested artifact.
    pub kind: RequestKind,
}

impl RunRequest {
    /// Requests the log and data file.
    #[must_use]
    pub fn evolve(params: ParameterSet) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            params,
            kind: RequestKind::Evolve,
        }
    }

    /// Requests the log and a diagram.
    #[must_use]
    pub fn plot(params: ParameterSet, bounds: PlotBounds) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            params,
            kind: RequestKind::Plot(bounds),
        }
    }
}

/// Everything a front end needs to answer a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Request kind.
    pub kind: RequestKind,
    /// Classification of the engine output.
    pub verdict: Verdict,
    /// Engine process id.
    pub pid: Option<u32>,
    /// Engine exit code.
    pub exit_code: Option<i32>,
    /// Data file, for successful evolve requests.
    pub data_file: Option<PathBuf>,
    /// Diagram, for successful plot requests.
    pub image: Option<RenderedPlot>,
    /// Why the requested artifact is missing despite a successful run.
    pub artifact_error: Option<PipelineError>,
    /// Paths used by the run.
    pub paths: ArtifactPaths,
    /// When the run was admitted.
    pub started_at: DateTime<Utc>,
    /// When the report was assembled.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Engine log, verbatim.
    #[must_use]
    pub fn log(&self) -> &str {
        &self.verdict.display_text
    }

    /// Log followed by a notice when the requested artifact could not be produced.
    #[must_use]
    pub fn user_message(&self) -> String {
        match &self.artifact_error {
            Some(err) => format!("{}\n{}", self.log(), err.user_message()),
            None => self.log().to_string(),
        }
    }
}

/// Progress of a session through the strictly ordered stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Admitted, nothing written yet.
    Opened,
    /// Engine input on disk.
    InputWritten,
    /// Engine exited and output captured.
    EngineRan,
    /// Output classified.
    Classified {
        /// Verdict outcome.
        success: bool,
    },
    /// Diagram rendered.
    Plotted,
    /// A stage failed; the session accepts no further work.
    Aborted,
}

struct PipelineShared {
    locator: ArtifactLocator,
    runner: SimulationRunner,
    classifier: Arc<dyn OutcomeClassifier>,
    renderer: PlotRenderer,
    telemetry: PipelineTelemetry,
}

/// Serializes, runs, classifies and plots single-star evolution requests.
pub struct SimulationPipeline {
    shared: Arc<PipelineShared>,
    gate: Arc<Semaphore>,
    busy_policy: BusyPolicy,
    config: PipelineConfig,
}

impl SimulationPipeline {
    /// Returns a builder.
    #[must_use]
    pub fn builder(config: PipelineConfig) -> SimulationPipelineBuilder {
        SimulationPipelineBuilder::new(config)
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Artifact locator, for front ends that discard delivered runs.
    #[must_use]
    pub fn locator(&self) -> &ArtifactLocator {
        &self.shared.locator
    }

    /// Admits a new run, waiting or failing per the busy policy.
    pub async fn open_session(&self) -> Result<RunSession, PipelineError> {
        self.admit(Uuid::new_v4()).await
    }

    async fn admit(&self, run_id: Uuid) -> Result<RunSession, PipelineError> {
        let permit = match self.busy_policy {
            BusyPolicy::Queue => Arc::clone(&self.gate)
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Busy)?,
            BusyPolicy::Reject => match Arc::clone(&self.gate).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => {
                    self.shared
                        .telemetry
                        .stage(run_id, LogLevel::Warn, "sse.run.rejected", json!({}))
                        .await;
                    return Err(PipelineError::Busy);
                }
            },
        };
        Ok(RunSession {
            run_id,
            paths: self.shared.locator.locate(run_id),
            stage: SessionStage::Opened,
            run: None,
            verdict: None,
            started_at: Utc::now(),
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Runs a whole request in order: input, engine, classification, artifact.
    ///
    /// Input, launch, capture, timeout and busy failures abort with `Err`; their telemetry
    /// carries `request.run_id`. An engine abort, or a data/render failure after a successful
    /// run, still yields a report with the log.
    pub async fn execute(&self, request: RunRequest) -> Result<RunReport, PipelineError> {
        let mut session = self.admit(request.run_id).await?;
        session.construct_evolve_in(&request.params).await?;
        let run = session.run_engine().await?;
        let verdict = session.classify().await?;

        let mut data_file = None;
        let mut image = None;
        let mut artifact_error = None;
        if verdict.success {
            match request.kind {
                RequestKind::Evolve => {
                    let path = session.paths().data_file.clone();
                    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        data_file = Some(path);
                    } else {
                        artifact_error = Some(PipelineError::DataFile {
                            path,
                            message: "engine did not write a data file".into(),
                        });
                    }
                }
                RequestKind::Plot(bounds) => match session.render_plot(&bounds).await {
                    Ok(rendered) => image = Some(rendered),
                    Err(err) => artifact_error = Some(err),
                },
            }
        }

        Ok(RunReport {
            run_id: session.run_id(),
            kind: request.kind,
            verdict,
            pid: run.pid,
            exit_code: run.exit_code,
            data_file,
            image,
            artifact_error,
            paths: session.paths().clone(),
            started_at: session.started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Builder for [`SimulationPipeline`].
pub struct SimulationPipelineBuilder {
    config: PipelineConfig,
    telemetry: Option<PipelineTelemetry>,
    classifier: Option<Arc<dyn OutcomeClassifier>>,
}

impl SimulationPipelineBuilder {
    /// Creates a builder from configuration.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            telemetry: None,
            classifier: None,
        }
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Replaces the sentinel classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Validates the configuration and builds the pipeline.
    pub fn build(self) -> Result<SimulationPipeline> {
        let config = self.config;
        config.validate()?;
        let locator = ArtifactLocator::new(
            config.artifacts.isolation,
            &config.engine.working_dir,
            &config.artifacts.runs_dir,
            config.engine.input_file.clone(),
            config.engine.data_file.clone(),
            &config.artifacts.image_file,
        );
        let runner = SimulationRunner::new(config.program_path()).with_timeout(config.timeout());
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(SentinelClassifier::new(
                config.engine.failure_sentinel.clone(),
            ))
        });
        let renderer = PlotRenderer::new(
            config.plot.width,
            config.plot.height,
            config.plot.title.clone(),
        );
        Ok(SimulationPipeline {
            shared: Arc::new(PipelineShared {
                locator,
                runner,
                classifier,
                renderer,
                telemetry: self.telemetry.unwrap_or_default(),
            }),
            gate: Arc::new(Semaphore::new(config.run_permits())),
            busy_policy: config.concurrency.busy_policy,
            config,
        })
    }
}

/// One admitted run. Holds its run slot until dropped.
pub struct RunSession {
    run_id: Uuid,
    paths: ArtifactPaths,
    stage: SessionStage,
    run: Option<RunResult>,
    verdict: Option<Verdict>,
    started_at: DateTime<Utc>,
    shared: Arc<PipelineShared>,
    _permit: OwnedSemaphorePermit,
}

impl RunSession {
    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Artifact paths of this run.
    #[must_use]
    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Current stage.
    #[must_use]
    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    /// Verdict, once classified.
    #[must_use]
    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    fn expect_stage(&self, expected: SessionStage, operation: &str) -> Result<(), PipelineError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(PipelineError::Sequence(format!(
                "{operation} requires stage {expected:?}, session is at {:?}",
                self.stage
            )))
        }
    }

    async fn abort(&mut self, event_type: &str, err: &PipelineError) {
        self.stage = SessionStage::Aborted;
        self.shared
            .telemetry
            .stage(
                self.run_id,
                LogLevel::Error,
                event_type,
                json!({ "kind": err.kind(), "error": err.to_string() }),
            )
            .await;
    }

    /// Writes the engine input for `params`, replacing any previous input at the path.
    pub async fn construct_evolve_in(&mut self, params: &ParameterSet) -> Result<(), PipelineError> {
        self.expect_stage(SessionStage::Opened, "construct_evolve_in")?;
        let written = async {
            self.shared.locator.prepare(&self.paths).await.map_err(|err| {
                PipelineError::InputWrite {
                    path: self.paths.work_dir.clone(),
                    message: err.to_string(),
                }
            })?;
            serializer::write_input(params, &self.paths.input_file).await
        }
        .await;
        if let Err(err) = written {
            self.abort("sse.input.failed", &err).await;
            return Err(err);
        }
        self.stage = SessionStage::InputWritten;
        self.shared
            .telemetry
            .stage(
                self.run_id,
                LogLevel::Info,
                "sse.input.written",
                json!({ "path": self.paths.input_file, "params": params }),
            )
            .await;
        Ok(())
    }

    /// Launches the engine and waits for it without blocking the runtime.
    pub async fn run_engine(&mut self) -> Result<RunResult, PipelineError> {
        self.expect_stage(SessionStage::InputWritten, "run_engine")?;
        if let Err(err) = self.paths.clear_outputs().await {
            let err = PipelineError::InputWrite {
                path: self.paths.data_file.clone(),
                message: format!("removing previous outputs: {err}"),
            };
            self.abort("sse.input.failed", &err).await;
            return Err(err);
        }
        self.shared
            .telemetry
            .stage(
                self.run_id,
                LogLevel::Info,
                "sse.engine.started",
                json!({ "program": self.shared.runner.program(), "work_dir": self.paths.work_dir }),
            )
            .await;
        match self.shared.runner.run(&self.paths.work_dir).await {
            Ok(run) => {
                self.stage = SessionStage::EngineRan;
                self.shared
                    .telemetry
                    .stage(
                        self.run_id,
                        LogLevel::Info,
                        "sse.engine.completed",
                        json!({
                            "pid": run.pid,
                            "exit_code": run.exit_code,
                            "elapsed_ms": run.elapsed_ms,
                            "output_bytes": run.output.len(),
                        }),
                    )
                    .await;
                self.run = Some(run.clone());
                Ok(run)
            }
            Err(err) => {
                self.abort("sse.engine.failed", &err).await;
                Err(err)
            }
        }
    }

    /// Classifies the output this session's engine run captured and records the verdict.
    pub async fn classify(&mut self) -> Result<Verdict, PipelineError> {
        self.expect_stage(SessionStage::EngineRan, "classify")?;
        let Some(run) = self.run.as_ref() else {
            return Err(PipelineError::Sequence(
                "classify requires a captured engine run".into(),
            ));
        };
        let verdict = self.shared.classifier.classify(run);
        self.stage = SessionStage::Classified {
            success: verdict.success,
        };
        let level = if verdict.success {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        self.shared
            .telemetry
            .stage(
                self.run_id,
                level,
                "sse.run.classified",
                json!({ "success": verdict.success }),
            )
            .await;
        self.verdict = Some(verdict.clone());
        Ok(verdict)
    }

    /// Renders the diagram from this run's data file. Only allowed after a successful verdict.
    pub async fn render_plot(&mut self, bounds: &PlotBounds) -> Result<RenderedPlot, PipelineError> {
        match self.stage {
            SessionStage::Classified { success: true } => {}
            SessionStage::Classified { success: false } => {
                return Err(PipelineError::SimulationFailed)
            }
            _ => {
                self.expect_stage(SessionStage::Classified { success: true }, "render_plot")?;
            }
        }
        match self.render(bounds).await {
            Ok(rendered) => {
                self.stage = SessionStage::Plotted;
                self.shared
                    .telemetry
                    .stage(
                        self.run_id,
                        LogLevel::Info,
                        "sse.plot.rendered",
                        json!({
                            "path": rendered.path,
                            "x_range": [rendered.x_range.0, rendered.x_range.1],
                            "y_range": [rendered.y_range.0, rendered.y_range.1],
                            "points": rendered.points,
                        }),
                    )
                    .await;
                Ok(rendered)
            }
            Err(err) => {
                self.abort("sse.plot.failed", &err).await;
                Err(err)
            }
        }
    }

    async fn render(&self, bounds: &PlotBounds) -> Result<RenderedPlot, PipelineError> {
        let track = EvolutionTrack::load(&self.paths.data_file).await?;
        let renderer = self.shared.renderer.clone();
        let bounds = *bounds;
        let out = self.paths.image_file.clone();
        tokio::task::spawn_blocking(move || renderer.render(&track, &bounds, &out))
            .await
            .map_err(|err| PipelineError::Render(format!("render task failed: {err}")))?
            .map_err(PipelineError::from)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{artifacts::IsolationMode, errors::ErrorKind, runner::tests::fake_engine};
    use shared_event_bus::MemoryEventBus;
    use std::{path::Path, time::Duration};
    use tempfile::{tempdir, TempDir};

    const TRACK: &str = "\
     Tev(Myr)    type      Mo        Mt      log10(L)    log10(R)   log10(Teff)  Mc        Menv       epoch      spin
     0.0000  1    1.0000    1.0000   -2.0000   -0.0500    3.7600  0.0000E+00  0.0000E+00  0.0000E+00  0.5000E+01
  5000.0000  1    1.0000    1.0000    0.2000    0.0500    3.7700  0.0000E+00  0.0000E+00  0.0000E+00  0.4000E+01
  9500.0000  3    1.0000    0.9000    4.0000    2.0000    3.5000  0.4000E+00  0.5000E+00  0.0000E+00  0.1000E+01
";

    /// Fake engine: aborts on negative mass, otherwise echoes its input and writes the track.
    fn engine_script(extra: &str) -> String {
        format!(
            "read mass z tphysf < evolve.in
case \"$mass\" in
  -*) echo ' FATAL ERROR: mass out of range'; echo 'STOP' >&2; exit 2 ;;
esac
{extra}
echo \" Evolving mass=$mass z=$z to $tphysf Myr\"
cat > evolve.dat <<'EOF'
{TRACK}EOF"
        )
    }

    struct Fixture {
        root: TempDir,
        bus: Arc<MemoryEventBus>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempdir().unwrap();
            std::fs::create_dir_all(root.path().join("sse")).unwrap();
            Self {
                root,
                bus: Arc::new(MemoryEventBus::new(64)),
            }
        }

        fn dir(&self) -> &Path {
            self.root.path()
        }

        fn config(&self, isolation: IsolationMode, script: &str) -> PipelineConfig {
            let engine = fake_engine(self.dir(), script);
            let mut config = PipelineConfig::default();
            config.engine.program = engine;
            config.engine.timeout_secs = Some(10);
            config.artifacts.isolation = isolation;
            config.resolve_paths(self.dir());
            config
        }

        fn pipeline(&self, config: PipelineConfig) -> SimulationPipeline {
            let telemetry = PipelineTelemetry::builder("sse-pipeline")
                .log_path(self.dir().join("logs/sse.jsonl"))
                .event_publisher(self.bus.clone())
                .build()
                .unwrap();
            SimulationPipeline::builder(config)
                .telemetry(telemetry)
                .build()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn default_star_produces_log_and_diagram() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, &engine_script("")));
        let report = pipeline
            .execute(RunRequest::plot(
                ParameterSet::new(1.0, 0.02, 10_000.0),
                PlotBounds::default(),
            ))
            .await
            .unwrap();

        assert!(report.verdict.success);
        assert!(report.log().contains("Evolving mass=1.0 z=0.02 to 10000.0 Myr"));
        let image = report.image.as_ref().unwrap();
        assert_eq!(image.path, fx.dir().join("hrdiag.svg"));
        assert!(image.path.exists());
        assert!((image.y_range.0 - 0.01).abs() < 1e-15);
        assert!((image.y_range.1 - 10_000.0).abs() < 1e-9);
        assert_eq!(report.artifact_error, None);
        assert_eq!(
            std::fs::read_to_string(fx.dir().join("sse/evolve.in")).unwrap(),
            "1.0 0.02 10000.0\n0.5 0.0 0.5 190.0\n0 1 0 1 3.0 999\n0.05 0.01 0.02\n"
        );
        assert_eq!(
            fx.bus.event_types_for(&report.run_id.to_string()),
            vec![
                "sse.input.written",
                "sse.engine.started",
                "sse.engine.completed",
                "sse.run.classified",
                "sse.plot.rendered",
            ]
        );
    }

    #[tokio::test]
    async fn evolve_request_hands_back_the_data_file() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, &engine_script("")));
        let report = pipeline
            .execute(RunRequest::evolve(ParameterSet::new(1.0, 0.02, 10_000.0)))
            .await
            .unwrap();
        assert_eq!(report.data_file, Some(fx.dir().join("sse/evolve.dat")));
        assert!(report.image.is_none());
    }

    #[tokio::test]
    async fn engine_abort_returns_log_without_diagram() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, &engine_script("")));
        // A stale diagram from an earlier run must not survive.
        std::fs::write(fx.dir().join("hrdiag.svg"), "<svg/>").unwrap();
        let report = pipeline
            .execute(RunRequest::plot(
                ParameterSet::new(-5.0, 0.02, 10_000.0),
                PlotBounds::default(),
            ))
            .await
            .unwrap();

        assert!(!report.verdict.success);
        assert_eq!(report.log(), " FATAL ERROR: mass out of range\nSTOP\n");
        assert_eq!(report.user_message(), report.log());
        assert!(report.image.is_none());
        assert!(report.artifact_error.is_none());
        assert!(!fx.dir().join("hrdiag.svg").exists());
    }

    #[tokio::test]
    async fn missing_engine_fails_after_writing_input() {
        let fx = Fixture::new();
        let mut config = fx.config(IsolationMode::Shared, "true");
        config.engine.program = fx.dir().join("not-installed/sse");
        let pipeline = fx.pipeline(config);
        let err = pipeline
            .execute(RunRequest::evolve(ParameterSet::new(1.0, 0.02, 10_000.0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Launch);
        assert!(fx.dir().join("sse/evolve.in").exists());
        assert!(!fx.dir().join("sse/evolve.dat").exists());
    }

    #[tokio::test]
    async fn malformed_data_file_only_fails_the_plot() {
        let fx = Fixture::new();
        let script = "echo 'done'\necho 'garbage 1 2' > evolve.dat\necho '1.0 1 1.0' >> evolve.dat";
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, script));
        let report = pipeline
            .execute(RunRequest::plot(
                ParameterSet::new(1.0, 0.02, 1.0),
                PlotBounds::default(),
            ))
            .await
            .unwrap();
        assert!(report.verdict.success);
        assert_eq!(report.log(), "done\n");
        assert_eq!(
            report.artifact_error.as_ref().map(PipelineError::kind),
            Some(ErrorKind::DataFile)
        );
        assert!(report.user_message().starts_with("done\n"));
    }

    #[tokio::test]
    async fn missing_data_file_fails_the_evolve_artifact() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, "echo quiet"));
        let report = pipeline
            .execute(RunRequest::evolve(ParameterSet::new(1.0, 0.02, 1.0)))
            .await
            .unwrap();
        assert!(report.data_file.is_none());
        assert_eq!(
            report.artifact_error.map(|err| err.kind()),
            Some(ErrorKind::DataFile)
        );
    }

    #[tokio::test]
    async fn explicit_bounds_reach_the_renderer() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, &engine_script("")));
        let bounds = PlotBounds::parse("2000,20000", "1e-3,1e5").unwrap();
        let report = pipeline
            .execute(RunRequest::plot(ParameterSet::new(1.0, 0.02, 1.0), bounds))
            .await
            .unwrap();
        let image = report.image.unwrap();
        assert_eq!(image.x_range, (2_000.0, 20_000.0));
        assert_eq!(image.y_range, (1e-3, 1e5));
    }

    #[tokio::test]
    async fn session_enforces_stage_order() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, &engine_script("")));
        let mut session = pipeline.open_session().await.unwrap();

        let err = session.run_engine().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sequence);
        let err = session.render_plot(&PlotBounds::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sequence);

        session
            .construct_evolve_in(&ParameterSet::new(-1.0, 0.02, 1.0))
            .await
            .unwrap();
        session.run_engine().await.unwrap();
        let verdict = session.classify().await.unwrap();
        assert!(!verdict.success);
        assert_eq!(
            session.render_plot(&PlotBounds::default()).await,
            Err(PipelineError::SimulationFailed)
        );
        assert_eq!(session.stage(), SessionStage::Classified { success: false });
    }

    #[tokio::test]
    async fn reject_policy_turns_away_overlapping_runs() {
        let fx = Fixture::new();
        let mut config = fx.config(IsolationMode::Shared, &engine_script(""));
        config.concurrency.busy_policy = BusyPolicy::Reject;
        let pipeline = fx.pipeline(config);

        let held = pipeline.open_session().await.unwrap();
        let err = pipeline
            .execute(RunRequest::evolve(ParameterSet::new(1.0, 0.02, 1.0)))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::Busy);
        drop(held);
        assert!(pipeline
            .execute(RunRequest::evolve(ParameterSet::new(1.0, 0.02, 1.0)))
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queued_shared_runs_do_not_cross_contaminate() {
        let fx = Fixture::new();
        let pipeline = Arc::new(fx.pipeline(fx.config(
            IsolationMode::Shared,
            &engine_script("sleep 0.2"),
        )));
        let masses = [1.0, 2.0, 3.0];
        let handles: Vec<_> = masses
            .iter()
            .map(|mass| {
                let pipeline = Arc::clone(&pipeline);
                let params = ParameterSet::new(*mass, 0.02, 100.0);
                tokio::spawn(async move { pipeline.execute(RunRequest::evolve(params)).await })
            })
            .collect();
        for (mass, handle) in masses.iter().zip(handles) {
            let report = handle.await.unwrap().unwrap();
            assert!(report.log().contains(&format!("mass={mass:?} ")));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_run_isolation_allows_parallel_runs() {
        let fx = Fixture::new();
        let mut config = fx.config(IsolationMode::PerRun, &engine_script("sleep 0.5"));
        config.concurrency.max_concurrent_runs = 2;
        config.concurrency.busy_policy = BusyPolicy::Reject;
        let pipeline = Arc::new(fx.pipeline(config));

        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .execute(RunRequest::plot(
                        ParameterSet::new(1.5, 0.02, 1.0),
                        PlotBounds::default(),
                    ))
                    .await
            })
        };
        let second = pipeline
            .execute(RunRequest::plot(
                ParameterSet::new(4.0, 0.02, 1.0),
                PlotBounds::default(),
            ))
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert_ne!(first.paths.work_dir, second.paths.work_dir);
        assert!(first.log().contains("mass=1.5 "));
        assert!(second.log().contains("mass=4.0 "));
        assert!(first.image.unwrap().path.starts_with(&first.paths.work_dir));
        assert!(pipeline.locator().discard(&second.paths).await.unwrap());
    }

    #[tokio::test]
    async fn hung_engine_reports_timeout() {
        let fx = Fixture::new();
        let mut config = fx.config(IsolationMode::Shared, "exec sleep 30");
        config.engine.timeout_secs = Some(1);
        let pipeline = fx.pipeline(config);
        let started = std::time::Instant::now();
        let err = pipeline
            .execute(RunRequest::evolve(ParameterSet::new(1.0, 0.02, 1.0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(fx
            .bus
            .snapshot()
            .iter()
            .any(|event| event.event_type == "sse.engine.failed"));
    }

    #[tokio::test]
    async fn verdict_comes_from_the_captured_run() {
        let fx = Fixture::new();
        let script = format!("cat > evolve.dat <<'EOF'\n{TRACK}EOF\necho ' evolving'\necho 'STOP'");
        let pipeline = fx.pipeline(fx.config(IsolationMode::Shared, &script));
        let mut session = pipeline.open_session().await.unwrap();
        session
            .construct_evolve_in(&ParameterSet::new(1.0, 0.02, 1.0))
            .await
            .unwrap();
        let run = session.run_engine().await.unwrap();
        assert!(fx.dir().join("sse/evolve.dat").exists());

        let verdict = session.classify().await.unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.display_text, run.output);
        assert_eq!(session.verdict(), Some(&verdict));
        assert_eq!(
            session.render_plot(&PlotBounds::default()).await,
            Err(PipelineError::SimulationFailed)
        );
        assert!(!fx.dir().join("hrdiag.svg").exists());
    }

    #[tokio::test]
    async fn failed_requests_keep_their_run_id_in_telemetry() {
        let fx = Fixture::new();
        let mut config = fx.config(IsolationMode::Shared, "true");
        config.engine.program = fx.dir().join("not-installed/sse");
        config.concurrency.busy_policy = BusyPolicy::Reject;
        let pipeline = fx.pipeline(config);

        let request = RunRequest::evolve(ParameterSet::new(1.0, 0.02, 1.0));
        let run_id = request.run_id.to_string();
        assert!(pipeline.execute(request).await.is_err());
        assert_eq!(
            fx.bus.event_types_for(&run_id),
            vec!["sse.input.written", "sse.engine.started", "sse.engine.failed"]
        );
        let records =
            shared_logging::read_records(fx.dir().join("logs/sse.jsonl"), Some(&run_id)).unwrap();
        assert_eq!(records.len(), 3);

        let held = pipeline.open_session().await.unwrap();
        let rejected = RunRequest::evolve(ParameterSet::new(1.0, 0.02, 1.0));
        let rejected_id = rejected.run_id.to_string();
        assert_eq!(pipeline.execute(rejected).await, Err(PipelineError::Busy));
        assert_eq!(fx.bus.event_types_for(&rejected_id), vec!["sse.run.rejected"]);
        drop(held);
    }
}
