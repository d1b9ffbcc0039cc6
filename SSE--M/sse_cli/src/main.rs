use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use shared_event_bus::FileEventPublisher;
use sse_pipeline::{
    params::{Field, ParameterSet},
    plot::PlotBounds,
    prelude::{PipelineConfig, PipelineTelemetry, RunReport, RunRequest, SimulationPipeline},
    serializer,
};
use tokio::runtime::Runtime;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "sse", version, about = "Single-star evolution runs and HR diagrams")]
struct Cli {
    /// Pipeline configuration (TOML). Defaults apply relative to the current directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// JSON-lines run manifest.
    #[arg(long, global = true, default_value = "runs/manifest.jsonl")]
    manifest: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evolves a star and reports the engine log and data file.
    Evolve(ParamArgs),
    /// Evolves a star and renders its HR diagram.
    Plot {
        #[command(flatten)]
        params: ParamArgs,
        /// Temperature bounds: `default` or `min,max`.
        #[arg(long, default_value = "default", allow_hyphen_values = true)]
        xbounds: String,
        /// Luminosity bounds: `default` or `min,max`.
        #[arg(long, default_value = "default", allow_hyphen_values = true)]
        ybounds: String,
    },
    /// Prints the engine input for the parameters without running anything.
    Input(ParamArgs),
    /// Lists most recent runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Shows a run's manifest entry and its log records.
    Status { run_id: String },
}

/// Engine inputs as text; coercion happens in the pipeline.
#[derive(Args, Debug)]
struct ParamArgs {
    #[arg(long, allow_hyphen_values = true, help = Field::Mass.description())]
    mass: String,
    #[arg(long, allow_hyphen_values = true, help = Field::Z.description())]
    z: String,
    #[arg(long, allow_hyphen_values = true, help = Field::Tphysf.description())]
    tphysf: String,
    #[arg(long, allow_hyphen_values = true, help = Field::Neta.description())]
    neta: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Bwind.description())]
    bwind: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Hewind.description())]
    hewind: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Sigma.description())]
    sigma: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Ifflag.description())]
    ifflag: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Wdflag.description())]
    wdflag: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Bhflag.description())]
    bhflag: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Nsflag.description())]
    nsflag: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Mxns.description())]
    mxns: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Idum.description())]
    idum: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Pts1.description())]
    pts1: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Pts2.description())]
    pts2: Option<String>,
    #[arg(long, allow_hyphen_values = true, help = Field::Pts3.description())]
    pts3: Option<String>,
}

impl ParamArgs {
    fn pairs(&self) -> Vec<(&'static str, &str)> {
        let optional = [
            ("neta", &self.neta),
            ("bwind", &self.bwind),
            ("hewind", &self.hewind),
            ("sigma", &self.sigma),
            ("ifflag", &self.ifflag),
            ("wdflag", &self.wdflag),
            ("bhflag", &self.bhflag),
            ("nsflag", &self.nsflag),
            ("mxns", &self.mxns),
            ("idum", &self.idum),
            ("pts1", &self.pts1),
            ("pts2", &self.pts2),
            ("pts3", &self.pts3),
        ];
        let mut pairs = vec![
            ("mass", self.mass.as_str()),
            ("z", self.z.as_str()),
            ("tphysf", self.tphysf.as_str()),
        ];
        pairs.extend(
            optional
                .into_iter()
                .filter_map(|(name, value)| value.as_deref().map(|text| (name, text))),
        );
        pairs
    }

    fn to_params(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::from_pairs(self.pairs())?)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct RunManifestEntry {
    run_id: String,
    command: String,
    submitted_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    params: ParameterSet,
    status: String,
    artifact: Option<PathBuf>,
    error: Option<String>,
}

impl RunManifestEntry {
    fn from_report(report: &RunReport, command: &str, params: ParameterSet) -> Self {
        let status = if !report.verdict.success {
            "simulation_failed"
        } else if report.artifact_error.is_some() {
            "artifact_failed"
        } else {
            "succeeded"
        };
        Self {
            run_id: report.run_id.to_string(),
            command: command.into(),
            submitted_at: report.started_at,
            finished_at: report.finished_at,
            params,
            status: status.into(),
            artifact: report
                .image
                .as_ref()
                .map(|image| image.path.clone())
                .or_else(|| report.data_file.clone()),
            error: report.artifact_error.as_ref().map(ToString::to_string),
        }
    }

    fn from_error(
        run_id: Uuid,
        command: &str,
        params: ParameterSet,
        submitted_at: DateTime<Utc>,
        error: &str,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            command: command.into(),
            submitted_at,
            finished_at: Utc::now(),
            params,
            status: "error".into(),
            artifact: None,
            error: Some(error.into()),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Evolve(args) => {
            let params = args.to_params()?;
            let config = load_config(cli.config.as_deref())?;
            handle_run(
                config,
                &cli.manifest,
                "evolve",
                RunRequest::evolve(params),
            )
        }
        Commands::Plot {
            params,
            xbounds,
            ybounds,
        } => {
            let params = params.to_params()?;
            let bounds = PlotBounds::parse(&xbounds, &ybounds)?;
            let config = load_config(cli.config.as_deref())?;
            handle_run(
                config,
                &cli.manifest,
                "plot",
                RunRequest::plot(params, bounds),
            )
        }
        Commands::Input(args) => {
            print!("{}", serializer::render(&args.to_params()?)?);
            Ok(())
        }
        Commands::List { limit } => {
            let entries = read_manifest(&cli.manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {} | mass={} z={} tphysf={}",
                    entry.run_id,
                    entry.command,
                    entry.status,
                    entry.submitted_at,
                    entry.params.mass,
                    entry.params.z,
                    entry.params.tphysf
                );
            }
            Ok(())
        }
        Commands::Status { run_id } => {
            let entries = read_manifest(&cli.manifest)?;
            let Some(entry) = entries.into_iter().find(|e| e.run_id == run_id) else {
                println!("run {run_id} not found");
                return Ok(());
            };
            println!("{}", serde_json::to_string_pretty(&entry)?);
            let config = load_config(cli.config.as_deref())?;
            if let Some(log_path) = config.telemetry.log_path.as_ref() {
                for record in shared_logging::read_records(log_path, Some(run_id.as_str()))? {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => {
            let mut config = PipelineConfig::default();
            config.resolve_paths(&std::env::current_dir()?);
            Ok(config)
        }
    }
}

fn build_pipeline(config: PipelineConfig) -> Result<SimulationPipeline> {
    let mut telemetry = PipelineTelemetry::builder("sse");
    if let Some(path) = config.telemetry.log_path.as_ref() {
        telemetry = telemetry.log_path(path);
    }
    if let Some(path) = config.telemetry.event_log.as_ref() {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    SimulationPipeline::builder(config)
        .telemetry(telemetry.build()?)
        .build()
}

fn handle_run(
    config: PipelineConfig,
    manifest: &Path,
    command: &str,
    request: RunRequest,
) -> Result<()> {
    let runtime = Runtime::new()?;
    let pipeline = build_pipeline(config)?;
    let params = request.params.clone();
    let run_id = request.run_id;
    let submitted_at = Utc::now();

    match runtime.block_on(pipeline.execute(request)) {
        Ok(report) => {
            append_manifest(
                manifest,
                &RunManifestEntry::from_report(&report, command, params),
            )?;
            print!("{}", report.user_message());
            if !report.user_message().ends_with('\n') {
                println!();
            }
            if let Some(image) = &report.image {
                println!("diagram: {}", image.path.display());
            }
            if let Some(data_file) = &report.data_file {
                println!("data file: {}", data_file.display());
            }
            println!("run: {}", report.run_id);
            Ok(())
        }
        Err(err) => {
            append_manifest(
                manifest,
                &RunManifestEntry::from_error(run_id, command, params, submitted_at, &err.to_string()),
            )?;
            eprintln!("{}", err.user_message());
            Err(err.into())
        }
    }
}

fn append_manifest(path: &Path, entry: &RunManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<RunManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: RunManifestEntry = serde_json::from_str(&line)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        entries.push(entry);
    }
    Ok(entries)
}
