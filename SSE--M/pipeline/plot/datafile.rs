use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PlotError;

/// Data rows need at least the columns up to log10(Teff).
pub const MIN_COLUMNS: usize = 7;

/// One time step of the evolutionary track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackRow {
    /// Age in Myr.
    pub time: f64,
    /// Stellar type index.
    pub kstar: i32,
    /// Initial mass.
    pub mass0: f64,
    /// Current mass.
    pub mass: f64,
    /// log10 luminosity in solar units.
    pub log_lum: f64,
    /// log10 radius in solar units.
    pub log_radius: f64,
    /// log10 effective temperature in K.
    pub log_teff: f64,
    /// Core mass, when present.
    pub core_mass: Option<f64>,
    /// Envelope mass, when present.
    pub envelope_mass: Option<f64>,
    /// Epoch, when present.
    pub epoch: Option<f64>,
    /// Spin, when present.
    pub spin: Option<f64>,
}

impl TrackRow {
    /// Effective temperature in K.
    #[must_use]
    pub fn teff(&self) -> f64 {
        10f64.powf(self.log_teff)
    }

    /// Luminosity in solar units.
    #[must_use]
    pub fn luminosity(&self) -> f64 {
        10f64.powf(self.log_lum)
    }
}

/// All rows of one data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionTrack {
    /// File the rows came from.
    pub source: PathBuf,
    /// Rows in file order.
    pub rows: Vec<TrackRow>,
}

impl EvolutionTrack {
    /// Parses the engine's tabular output. Lines that do not start with a number are skipped.
    pub fn parse(text: &str, source: impl Into<PathBuf>) -> Result<Self, PlotError> {
        let source = source.into();
        let malformed = |message: String| PlotError::DataFile {
            path: source.clone(),
            message,
        };
        let mut rows = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(first) = tokens.first() else {
                continue;
            };
            if parse_number(first).is_none() {
                continue;
            }
            if tokens.len() < MIN_COLUMNS {
                return Err(malformed(format!(
                    "line {}: expected at least {MIN_COLUMNS} columns, found {}",
                    index + 1,
                    tokens.len()
                )));
            }
            let mut values = Vec::with_capacity(tokens.len());
            for token in &tokens {
                values.push(parse_number(token).ok_or_else(|| {
                    malformed(format!("line {}: `{token}` is not a number", index + 1))
                })?);
            }
            let optional = |column: usize| values.get(column).copied();
            #[allow(clippy::cast_possible_truncation)]
            let kstar = values[1] as i32;
            rows.push(TrackRow {
                time: values[0],
                kstar,
                mass0: values[2],
                mass: values[3],
                log_lum: values[4],
                log_radius: values[5],
                log_teff: values[6],
                core_mass: optional(7),
                envelope_mass: optional(8),
                epoch: optional(9),
                spin: optional(10),
            });
        }
        if rows.is_empty() {
            return Err(malformed("no data rows".into()));
        }
        Ok(Self { source, rows })
    }

    /// Reads and parses a data file without blocking the runtime.
    pub async fn load(path: &Path) -> Result<Self, PlotError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| PlotError::DataFile {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Self::parse(&text, path)
    }

    /// `(Teff, L)` points of the diagram.
    #[must_use]
    pub fn hr_points(&self) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .map(|row| (row.teff(), row.luminosity()))
            .collect()
    }
}

fn parse_number(token: &str) -> Option<f64> {
    let value: f64 = if token.contains(['d', 'D']) {
        token.replace(['d', 'D'], "e").parse().ok()?
    } else {
        token.parse().ok()?
    };
    value.is_finite().then_some(value)
}
