//! Runtime configuration.

use std::{fs, path::Path};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Knobs controlling buffer sizing, disconnect semantics, handshake timeouts, and the two
/// worker pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// `net.input.buffer.size` — bytes read per I/O worker invocation.
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: usize,

    /// `net.output.buffer.size` — chunk size used when slicing outbound payloads.
    #[serde(default = "default_output_buffer_size")]
    pub output_buffer_size: usize,

    /// `net.disconnect.and.remove` — whether destroying a channel also evicts its sessions
    /// from the session set and invokes `destroySession`.
    #[serde(default = "default_true")]
    pub disconnect_and_remove: bool,

    /// `net.connection.timeout` — `None` means `net.connection.timeout.available=false`.
    #[serde(default)]
    pub connection_timeout_ms: Option<u64>,

    /// Number of I/O workers draining READ/WRITE events.
    #[serde(default = "default_io_pool_size")]
    pub io_pool_size: usize,

    /// Number of service workers driving event dispatch and streaming sources.
    #[serde(default = "default_service_pool_size")]
    pub service_pool_size: usize,

    /// Maximum outbound packages drained per WRITE event.
    #[serde(default = "default_max_writes_per_flush")]
    pub max_writes_per_flush: usize,
}

fn default_input_buffer_size() -> usize {
    64 * 1024
}

fn default_output_buffer_size() -> usize {
    16 * 1024
}

fn default_true() -> bool {
    true
}

fn default_io_pool_size() -> usize {
    4
}

fn default_service_pool_size() -> usize {
    2
}

fn default_max_writes_per_flush() -> usize {
    50
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: default_input_buffer_size(),
            output_buffer_size: default_output_buffer_size(),
            disconnect_and_remove: default_true(),
            connection_timeout_ms: None,
            io_pool_size: default_io_pool_size(),
            service_pool_size: default_service_pool_size(),
            max_writes_per_flush: default_max_writes_per_flush(),
        }
    }
}

impl NetConfig {
    /// Loads configuration from a YAML file and validates it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {:?}", path.as_ref()))?;
        let cfg: Self = serde_yaml::from_str(&raw).context("failed to parse net config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates configuration invariants, returning a [`ConfigError`] on the first violation.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.input_buffer_size > 0, "input_buffer_size must be > 0");
        ensure!(self.output_buffer_size > 0, "output_buffer_size must be > 0");
        ensure!(self.io_pool_size > 0, "io_pool_size must be > 0");
        ensure!(self.service_pool_size > 0, "service_pool_size must be > 0");
        if let Some(ms) = self.connection_timeout_ms {
            ensure!(ms > 0, "connection_timeout_ms must be > 0 when set");
        }
        Ok(())
    }
}
