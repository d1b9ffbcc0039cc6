//! Renders a [`ParameterSet`] into the engine's positional input file.
//!
//! The engine reads four list-directed records. Field order and grouping per
//! line are fixed; reordering silently corrupts the run.

use std::path::Path;

use crate::{
    errors::PipelineError,
    params::{coerce, Field, FieldValue, ParameterError, ParameterSet},
};

/// Fields per input line, in read order.
pub const INPUT_LAYOUT: [&[Field]; 4] = [
    &[Field::Mass, Field::Z, Field::Tphysf],
    &[Field::Neta, Field::Bwind, Field::Hewind, Field::Sigma],
    &[
        Field::Ifflag,
        Field::Wdflag,
        Field::Bhflag,
        Field::Nsflag,
        Field::Mxns,
        Field::Idum,
    ],
    &[Field::Pts1, Field::Pts2, Field::Pts3],
];

/// Formats a real as the shortest round-trip decimal, always with a fractional part.
#[must_use]
pub fn format_real(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || !value.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}

/// Formats one field value.
#[must_use]
pub fn format_value(value: FieldValue) -> String {
    match value {
        FieldValue::Real(v) => format_real(v),
        FieldValue::Integer(v) => v.to_string(),
    }
}

/// Renders the complete input document.
pub fn render(params: &ParameterSet) -> Result<String, ParameterError> {
    params.validate()?;
    let mut out = String::new();
    for line in INPUT_LAYOUT {
        let values: Vec<String> = line
            .iter()
            .map(|field| format_value(params.get(*field)))
            .collect();
        out.push_str(&values.join(" "));
        out.push('\n');
    }
    Ok(out)
}

/// Renders and writes the input file, replacing any previous one.
pub async fn write_input(params: &ParameterSet, path: &Path) -> Result<(), PipelineError> {
    let text = render(params)?;
    tokio::fs::write(path, text)
        .await
        .map_err(|err| PipelineError::InputWrite {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

/// Parses an input document back into a [`ParameterSet`] by position.
pub fn parse_input(text: &str) -> Result<ParameterSet, ParameterError> {
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    if lines.len() != INPUT_LAYOUT.len() {
        return Err(ParameterError::Layout(format!(
            "expected {} lines, found {}",
            INPUT_LAYOUT.len(),
            lines.len()
        )));
    }
    let mut params = ParameterSet::new(0.0, 0.0, 0.0);
    for (index, (line, fields)) in lines.iter().zip(INPUT_LAYOUT).enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != fields.len() {
            return Err(ParameterError::Layout(format!(
                "line {} expects {} values, found {}",
                index + 1,
                fields.len(),
                tokens.len()
            )));
        }
        for (field, token) in fields.iter().zip(tokens) {
            params.set(*field, coerce(*field, token)?)?;
        }
    }
    Ok(params)
}
