//! Combined configuration: one YAML document with `net:`/`query:` top-level keys.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use netmux::NetConfig;
use queryengine::QueryConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XsvcConfig {
    #[serde(default)]
    pub net: NetConfig,
    #[serde(default)]
    pub query: QueryConfig,
    /// `listen.addr` — address the demo TCP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for XsvcConfig {
    fn default() -> Self {
        Self { net: NetConfig::default(), query: QueryConfig::default(), listen_addr: default_listen_addr() }
    }
}

impl XsvcConfig {
    /// Loads `net`/`query`/`listen_addr` from a single YAML document and validates `net`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).with_context(|| format!("failed to read {:?}", path.as_ref()))?;
        let cfg: Self = serde_yaml::from_str(&raw).context("failed to parse xsvc config YAML")?;
        cfg.net.validate().context("invalid net configuration")?;
        Ok(cfg)
    }
}
