use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keyword selecting auto-scaling.
pub const DEFAULT_KEYWORD: &str = "default";

/// Range for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisBounds {
    /// Scale to the data's extent.
    #[default]
    Auto,
    /// Use exactly this range.
    Fixed {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
}

/// Invalid textual bounds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoundsParseError {
    /// Not `default` and not two numbers.
    #[error("expected `default` or `min,max`, got `{0}`")]
    Format(String),
    /// Two numbers, but not an increasing finite pair.
    #[error("bounds must be finite with min < max, got `{0}`")]
    Order(String),
}

impl AxisBounds {
    /// Explicit range.
    #[must_use]
    pub fn fixed(min: f64, max: f64) -> Self {
        Self::Fixed { min, max }
    }

    /// Final axis range given the data extent.
    ///
    /// A degenerate auto range is widened by a factor of two each way so log axes stay drawable.
    #[must_use]
    pub fn resolve(self, data_min: f64, data_max: f64) -> (f64, f64) {
        match self {
            Self::Fixed { min, max } => (min, max),
            Self::Auto if data_min < data_max => (data_min, data_max),
            Self::Auto => (data_min / 2.0, data_max * 2.0),
        }
    }
}

impl FromStr for AxisBounds {
    type Err = BoundsParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(DEFAULT_KEYWORD) {
            return Ok(Self::Auto);
        }
        let inner = trimmed
            .trim_start_matches(['(', '['])
            .trim_end_matches([')', ']']);
        let parts: Vec<&str> = inner
            .split([',', ':', ' '])
            .filter(|part| !part.is_empty())
            .collect();
        let [min, max] = parts.as_slice() else {
            return Err(BoundsParseError::Format(text.to_string()));
        };
        let parse = |part: &str| {
            part.parse::<f64>()
                .map_err(|_| BoundsParseError::Format(text.to_string()))
        };
        let (min, max) = (parse(*min)?, parse(*max)?);
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(BoundsParseError::Order(text.to_string()));
        }
        Ok(Self::Fixed { min, max })
    }
}

impl fmt::Display for AxisBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str(DEFAULT_KEYWORD),
            Self::Fixed { min, max } => write!(f, "{min},{max}"),
        }
    }
}

/// Bounds for both axes of the diagram.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlotBounds {
    /// Effective temperature axis.
    pub x: AxisBounds,
    /// Luminosity axis.
    pub y: AxisBounds,
}

impl PlotBounds {
    /// Creates bounds for both axes.
    #[must_use]
    pub fn new(x: AxisBounds, y: AxisBounds) -> Self {
        Self { x, y }
    }

    /// Parses the textual form of both axes.
    pub fn parse(x: &str, y: &str) -> Result<Self, BoundsParseError> {
        Ok(Self::new(x.parse()?, y.parse()?))
    }
}
