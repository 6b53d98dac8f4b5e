use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_BIND_PORT: u16 = 12345;
const DEFAULT_RUNTIME: &str = "docker";
const DEFAULT_TIME_LIMIT: MilliSecond = MilliSecond(10_000);

#[derive(Parser)]
#[command(name = "codebox", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Number of HTTP worker threads (defaults to the number of CPUs)
    #[arg(long = "workers", short = 'w')]
    pub workers: Option<usize>,
}

impl CliArgs {
    /// Load the configuration from the specified file, or fall back to defaults
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let Some(path) = &self.config_path else {
            log::info!("No configuration file given, using defaults");
            return Ok(Config::default());
        };

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open configuration file {path}"))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse configuration file {path}"))
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS)
    }

    pub fn bind_port(&self) -> u16 {
        self.bind_port.unwrap_or(DEFAULT_BIND_PORT)
    }
}

/// Operator-facing sandbox settings.
///
/// Resource limits for the containers are fixed constants in the launcher and
/// intentionally absent here.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct SandboxConfig {
    /// Container runtime CLI, resolved through `PATH` unless absolute
    pub runtime: Option<String>,
    /// Wall-clock deadline for one run
    pub time_limit: Option<MilliSecond>,
    /// Directory under which per-request workspaces are created
    pub workspace_root: Option<PathBuf>,
}

impl SandboxConfig {
    pub fn runtime(&self) -> &str {
        self.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME)
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit.unwrap_or(DEFAULT_TIME_LIMIT).into()
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("codebox"))
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}
