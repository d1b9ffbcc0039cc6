use std::{
    fs,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{artifacts::IsolationMode, classifier::FAILURE_SENTINEL};

/// What to do with a request while the run gate is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait in FIFO order.
    #[default]
    Queue,
    /// Fail immediately with a busy error.
    Reject,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// External engine settings.
    pub engine: EngineConfig,
    /// Artifact placement.
    pub artifacts: ArtifactConfig,
    /// Run admission.
    pub concurrency: ConcurrencyConfig,
    /// Diagram appearance.
    pub plot: PlotConfig,
    /// Log and event sinks.
    pub telemetry: TelemetryConfig,
}

/// External engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine binary. Paths with a directory part are relative to `working_dir`.
    pub program: PathBuf,
    /// Directory the engine runs in when artifacts are shared.
    pub working_dir: PathBuf,
    /// Input file name the engine reads.
    pub input_file: String,
    /// Data file name the engine writes.
    pub data_file: String,
    /// Kill the engine after this many seconds; unset waits forever.
    pub timeout_secs: Option<u64>,
    /// Output token marking an internal abort.
    pub failure_sentinel: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./sse"),
            working_dir: PathBuf::from("sse"),
            input_file: "evolve.in".into(),
            data_file: "evolve.dat".into(),
            timeout_secs: None,
            failure_sentinel: FAILURE_SENTINEL.into(),
        }
    }
}

/// Artifact placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Shared fixed paths or per-run directories.
    pub isolation: IsolationMode,
    /// Root of per-run directories.
    pub runs_dir: PathBuf,
    /// Image path in shared mode; its file name is reused per run.
    pub image_file: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::Shared,
            runs_dir: PathBuf::from("runs"),
            image_file: PathBuf::from("hrdiag.svg"),
        }
    }
}

/// Run admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Behaviour when no run slot is free.
    pub busy_policy: BusyPolicy,
    /// Simultaneous runs in per-run mode. Shared mode always allows one.
    pub max_concurrent_runs: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::Queue,
            max_concurrent_runs: 1,
        }
    }
}

/// Diagram appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Caption.
    pub title: String,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Hertzsprung-Russell diagram".into(),
        }
    }
}

/// Log and event sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// JSON-lines log file.
    pub log_path: Option<PathBuf>,
    /// JSON-lines stage event file.
    pub event_log: Option<PathBuf>,
}

impl PipelineConfig {
    /// Loads configuration from a TOML file; relative paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        let base = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_toml_str(&raw, &base).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses a TOML document, resolving relative paths against `base_dir`.
    pub fn from_toml_str(raw: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Makes every relative path relative to `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        };
        resolve(&mut self.engine.working_dir);
        resolve(&mut self.artifacts.runs_dir);
        resolve(&mut self.artifacts.image_file);
        if let Some(path) = self.telemetry.log_path.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.telemetry.event_log.as_mut() {
            resolve(path);
        }
    }

    /// Rejects settings that would make every run fail or misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.engine.failure_sentinel.is_empty() {
            bail!("engine.failure_sentinel must not be empty");
        }
        for (key, name) in [
            ("engine.input_file", &self.engine.input_file),
            ("engine.data_file", &self.engine.data_file),
        ] {
            let mut components = Path::new(name).components();
            if !matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            ) {
                bail!("{key} must be a plain file name, got `{name}`");
            }
        }
        if self.engine.input_file == self.engine.data_file {
            bail!("engine.input_file and engine.data_file must differ");
        }
        if self.engine.timeout_secs == Some(0) {
            bail!("engine.timeout_secs must be positive when set");
        }
        if self.artifacts.image_file.file_name().is_none() {
            bail!("artifacts.image_file must name a file");
        }
        if self.concurrency.max_concurrent_runs == 0 {
            bail!("concurrency.max_concurrent_runs must be at least 1");
        }
        if self.plot.width == 0 || self.plot.height == 0 {
            bail!("plot.width and plot.height must be positive");
        }
        Ok(())
    }

    /// Engine binary as the child should be launched.
    ///
    /// Bare names are left for `PATH` lookup; other relative paths are anchored at
    /// the working directory and made absolute, since per-run children start elsewhere.
    #[must_use]
    pub fn program_path(&self) -> PathBuf {
        let program = &self.engine.program;
        if program.is_absolute() || program.components().count() == 1 {
            return program.clone();
        }
        let anchored = self.engine.working_dir.join(program);
        if anchored.is_absolute() {
            anchored
        } else {
            std::env::current_dir().map_or(anchored.clone(), |cwd| cwd.join(&anchored))
        }
    }

    /// Engine deadline.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.engine.timeout_secs.map(Duration::from_secs)
    }

    /// Number of runs allowed in flight.
    #[must_use]
    pub fn run_permits(&self) -> usize {
        match self.artifacts.isolation {
            IsolationMode::Shared => 1,
            IsolationMode::PerRun => self.concurrency.max_concurrent_runs,
        }
    }
}
