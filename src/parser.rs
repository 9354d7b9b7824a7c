//! Extraction of numeric readings from owhttpd device pages.
//!
//! owhttpd renders each property of a device as a table row:
//! `<TD><B>temperature</B></TD><TD>21.5</TD>`. The label must match the requested
//! measurement exactly; the adjacent cell holds the value.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("Measurement not found in response")]
    NotFound,
    #[error("Malformed value '{0}'")]
    Malformed(String),
    #[error("Measurement name cannot be matched: {0}")]
    InvalidName(#[from] regex::Error),
}

fn row_pattern(measurement: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"<TD><B>{}</B></TD><TD>(?<value>[^<]*)</TD>",
        regex::escape(measurement)
    ))
}

/// Returns the value of the first row labelled `measurement`.
pub fn extract(raw: &str, measurement: &str) -> Result<f64, ValueError> {
    let pattern = row_pattern(measurement)?;
    let captures = pattern.captures(raw).ok_or(ValueError::NotFound)?;
    let literal = captures
        .name("value")
        .map(|m| m.as_str().trim())
        .unwrap_or_default();

    parse_invariant(literal).ok_or_else(|| ValueError::Malformed(literal.to_string()))
}

// `str::parse::<f64>` always uses '.' as separator; infinities and NaN are not readings.
fn parse_invariant(literal: &str) -> Option<f64> {
    literal.parse::<f64>().ok().filter(|v| v.is_finite())
}
