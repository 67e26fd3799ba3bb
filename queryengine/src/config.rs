//! Runtime configuration.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Formatting and ordering knobs consulted by the parser and evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// `query.default.desc.order` — direction applied to an ORDER BY item with no explicit
    /// `DESC`/`ASC`.
    #[serde(default)]
    pub default_desc_order: bool,

    /// `query.date.format` — `chrono` strftime pattern a quoted literal must match to be
    /// recognized as a date rather than a plain string.
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// `query.decimal.format` — informational; decimal literals are always parsed with `.` as
    /// the separator, this field documents what the surrounding application expects back out.
    #[serde(default = "default_decimal_format")]
    pub decimal_format: String,

    /// `query.scientific.format` — same role as `decimal_format` for scientific notation.
    #[serde(default = "default_scientific_format")]
    pub scientific_format: String,
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_decimal_format() -> String {
    "#.##".to_string()
}

fn default_scientific_format() -> String {
    "0.0E0".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_desc_order: false,
            date_format: default_date_format(),
            decimal_format: default_decimal_format(),
            scientific_format: default_scientific_format(),
        }
    }
}

impl QueryConfig {
    /// Loads configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {:?}", path.as_ref()))?;
        let cfg: Self = serde_yaml::from_str(&raw).context("failed to parse query config YAML")?;
        Ok(cfg)
    }
}
