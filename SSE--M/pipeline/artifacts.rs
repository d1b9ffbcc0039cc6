use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How artifact paths are allocated to runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Fixed paths in the engine directory; runs must never overlap.
    #[default]
    Shared,
    /// One directory per run under the runs root.
    PerRun,
}

/// Locations of the artifacts of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// Run the paths belong to.
    pub run_id: Uuid,
    /// Engine working directory.
    pub work_dir: PathBuf,
    /// Serialized engine input.
    pub input_file: PathBuf,
    /// Tabular data written by the engine.
    pub data_file: PathBuf,
    /// Rendered diagram.
    pub image_file: PathBuf,
    /// Whether the paths are private to this run.
    pub isolated: bool,
}

impl ArtifactPaths {
    /// Removes outputs left by an earlier run so they cannot be mistaken for this run's.
    pub async fn clear_outputs(&self) -> io::Result<()> {
        for path in [&self.data_file, &self.image_file] {
            match tokio::fs::remove_file(path).await {
                Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Names and locates the input, data and image files of each run.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    mode: IsolationMode,
    engine_dir: PathBuf,
    runs_dir: PathBuf,
    input_name: String,
    data_name: String,
    image_file: PathBuf,
}

impl ArtifactLocator {
    /// Creates a locator. `image_file` is the shared image path; per-run mode keeps its file name.
    #[must_use]
    pub fn new(
        mode: IsolationMode,
        engine_dir: impl Into<PathBuf>,
        runs_dir: impl Into<PathBuf>,
        input_name: impl Into<String>,
        data_name: impl Into<String>,
        image_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode,
            engine_dir: engine_dir.into(),
            runs_dir: runs_dir.into(),
            input_name: input_name.into(),
            data_name: data_name.into(),
            image_file: image_file.into(),
        }
    }

    /// Isolation mode in use.
    #[must_use]
    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// Paths for a run.
    #[must_use]
    pub fn locate(&self, run_id: Uuid) -> ArtifactPaths {
        match self.mode {
            IsolationMode::Shared => ArtifactPaths {
                run_id,
                work_dir: self.engine_dir.clone(),
                input_file: self.engine_dir.join(&self.input_name),
                data_file: self.engine_dir.join(&self.data_name),
                image_file: self.image_file.clone(),
                isolated: false,
            },
            IsolationMode::PerRun => {
                let work_dir = self.runs_dir.join(format!("run-{run_id}"));
                let image_name = self
                    .image_file
                    .file_name()
                    .map_or_else(|| PathBuf::from("hrdiag.svg"), PathBuf::from);
                ArtifactPaths {
                    run_id,
                    input_file: work_dir.join(&self.input_name),
                    data_file: work_dir.join(&self.data_name),
                    image_file: work_dir.join(image_name),
                    work_dir,
                    isolated: true,
                }
            }
        }
    }

    /// Creates the directories a run writes into.
    pub async fn prepare(&self, paths: &ArtifactPaths) -> io::Result<()> {
        tokio::fs::create_dir_all(&paths.work_dir).await?;
        if let Some(parent) = non_empty_parent(&paths.image_file) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Deletes a per-run directory once its artifacts were delivered.
    ///
    /// Shared artifacts are left alone and `Ok(false)` is returned.
    pub async fn discard(&self, paths: &ArtifactPaths) -> io::Result<bool> {
        if !paths.isolated || !paths.work_dir.starts_with(&self.runs_dir) {
            return Ok(false);
        }
        match tokio::fs::remove_dir_all(&paths.work_dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}
