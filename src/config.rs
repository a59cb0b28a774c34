//! Configuration management for obfs-scout.
//!
//! This module provides configuration parsing from TOML files, command-line
//! arguments and environment variables. Configuration is applied in order:
//! defaults → config file → environment → command-line arguments, with later
//! sources overriding earlier ones.
//!
//! # Configuration Flow
//!
//! ```text
//!     ┌─────────────────┐
//!     │ Config::default │ ◄── Built-in defaults
//!     └────────┬────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐     ┌──────────────────────┐
//!     │ Config file     │ ◄───│ obfs-scout.toml      │  (TOML format)
//!     │ exists?         │     │ or --config          │
//!     └────────┬────────┘     └──────────────────────┘
//!              │
//!         Yes  │  No
//!       ┌──────┴───────┐
//!       ▼              │
//! ┌─────────────┐      │
//! │ Load file   │      │
//! └──────┬──────┘      │
//!        └──────┬──────┘
//!               ▼
//!     ┌─────────────────┐     ┌──────────────────────┐
//!     │ Apply env + CLI │ ◄───│ OBFS_SCOUT_* / flags │
//!     └────────┬────────┘     └──────────────────────┘
//!              ▼
//!     ┌─────────────────┐
//!     │ Validate        │
//!     └────────┬────────┘
//!              ▼
//!     ┌─────────────────┐
//!     │ Final Config    │
//!     └─────────────────┘
//! ```
//!
//! # Example Configuration File
//!
//! ```toml
//! loglevel = "notice"   # debug, info, notice, warn, error
//! # logfile = "/var/log/obfs-scout.log"
//! # base = "endpoint.toml"
//! # output = "results.json"
//!
//! [engine]
//! bin = "xray"
//! args = ["run", "-c", "{config}"]
//! # work_dir = "/tmp"
//!
//! [probe]
//! port_base = 20000
//! port_pool = 10000
//! readiness = "settle"        # settle or poll
//! settle_delay_ms = 1500
//! grace_period_ms = 3000
//! timeout_secs = 15
//! measure_throughput = false
//! check_url = "https://www.google.com/generate_204"
//! throughput_url = "https://speed.cloudflare.com/__down?bytes=1048576"
//!
//! [search]
//! mode = "smart"              # smart, full or quick
//! groups = ["fragment", "fingerprint", "alpn"]
//! concurrency = 10
//! top_n = 3
//! max_grid_size = 10000
//! ```
//!
//! # See Also
//!
//! - [`CliArgs`] for command-line argument parsing
//! - [`load_config`] for the loading function

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::params::{parse_groups, quick_groups, ParamGroup, DEFAULT_TOP_N};
use crate::ports::{PortAllocator, DEFAULT_PORT_BASE, DEFAULT_PORT_POOL};
use crate::probe::{
    EngineCommand, ReadinessPolicy, RunnerOptions, CONFIG_PLACEHOLDER, DEFAULT_CHECK_URL,
    DEFAULT_THROUGHPUT_URL,
};
use crate::search::{SearchMode, SearchSettings, DEFAULT_MAX_GRID_SIZE};

/// Log level for obfs-scout output.
///
/// From most to least verbose:
/// [`Debug`](LogLevel::Debug) > [`Info`](LogLevel::Info) > [`Notice`](LogLevel::Notice) >
/// [`Warn`](LogLevel::Warn) > [`Error`](LogLevel::Error)
///
/// # Example
///
/// ```rust
/// use obfs_scout::LogLevel;
///
/// let level: LogLevel = "warning".parse().unwrap();
/// assert_eq!(level, LogLevel::Warn);
/// assert!(LogLevel::Notice < level);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-probe lifecycle details.
    Debug,
    /// Informational messages.
    Info,
    /// Run start, summaries and progress.
    #[default]
    Notice,
    /// Problems that do not stop a search.
    Warn,
    /// Failures.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "NOTICE" => Ok(LogLevel::Notice),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "ERR" => Ok(LogLevel::Error),
            _ => Err(Error::Config(format!("invalid log level: {}", s))),
        }
    }
}

/// Proxy engine invocation.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `bin` | `"xray"` | Engine executable |
/// | `args` | `["run", "-c", "{config}"]` | Arguments; `{config}` becomes the config path |
/// | `work_dir` | OS temp dir | Where per-probe config files are written |
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Engine executable.
    #[serde(default = "default_engine_bin")]
    pub bin: String,
    /// Argument template.
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,
    /// Directory for per-probe config files.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_engine_bin() -> String {
    "xray".to_string()
}
fn default_engine_args() -> Vec<String> {
    vec!["run".into(), "-c".into(), CONFIG_PLACEHOLDER.into()]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bin: default_engine_bin(),
            args: default_engine_args(),
            work_dir: None,
        }
    }
}

/// Per-probe settings.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `port_base` | 20000 | First local SOCKS5 port |
/// | `port_pool` | 10000 | Number of rotating ports |
/// | `readiness` | `settle` | `settle` sleeps, `poll` polls the local port |
/// | `settle_delay_ms` | 1500 | Settle delay, or polling budget |
/// | `grace_period_ms` | 3000 | Time between SIGTERM and SIGKILL |
/// | `timeout_secs` | 15 | Bound on the connectivity and throughput checks |
/// | `measure_throughput` | false | Download the throughput target after a success |
/// | `check_url` | Google `generate_204` | Connectivity target |
/// | `throughput_url` | Cloudflare 1 MiB | Throughput target |
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// First local SOCKS5 port.
    #[serde(default = "default_port_base")]
    pub port_base: u16,
    /// Number of ports in rotation.
    #[serde(default = "default_port_pool")]
    pub port_pool: u16,
    /// Readiness strategy.
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    /// Settle delay in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Grace period in milliseconds.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Probe timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Measure throughput.
    #[serde(default)]
    pub measure_throughput: bool,
    /// Connectivity target.
    #[serde(default = "default_check_url")]
    pub check_url: String,
    /// Throughput target.
    #[serde(default = "default_throughput_url")]
    pub throughput_url: String,
}

fn default_port_base() -> u16 {
    DEFAULT_PORT_BASE
}
fn default_port_pool() -> u16 {
    DEFAULT_PORT_POOL
}
fn default_settle_delay_ms() -> u64 {
    1500
}
fn default_grace_period_ms() -> u64 {
    3000
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_check_url() -> String {
    DEFAULT_CHECK_URL.to_string()
}
fn default_throughput_url() -> String {
    DEFAULT_THROUGHPUT_URL.to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port_base: default_port_base(),
            port_pool: default_port_pool(),
            readiness: ReadinessPolicy::default(),
            settle_delay_ms: default_settle_delay_ms(),
            grace_period_ms: default_grace_period_ms(),
            timeout_secs: default_timeout_secs(),
            measure_throughput: false,
            check_url: default_check_url(),
            throughput_url: default_throughput_url(),
        }
    }
}

/// Search strategy settings.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `mode` | `smart` | `smart`, `full` or `quick` |
/// | `groups` | fragment, fingerprint, alpn | Groups to search (ignored in quick mode) |
/// | `concurrency` | 10 | Probes in flight, at most `port_pool` |
/// | `top_n` | 3 | Winners per group carried into combination |
/// | `max_grid_size` | 10000 | Refuse larger full-grid searches |
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Search mode.
    #[serde(default)]
    pub mode: SearchMode,
    /// Parameter groups.
    #[serde(default = "default_groups")]
    pub groups: Vec<ParamGroup>,
    /// Probes in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Winners per group for combination.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Full-grid bound.
    #[serde(default = "default_max_grid_size")]
    pub max_grid_size: usize,
}

fn default_groups() -> Vec<ParamGroup> {
    quick_groups().to_vec()
}
fn default_concurrency() -> usize {
    10
}
fn default_top_n() -> usize {
    DEFAULT_TOP_N
}
fn default_max_grid_size() -> usize {
    DEFAULT_MAX_GRID_SIZE
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            groups: default_groups(),
            concurrency: default_concurrency(),
            top_n: default_top_n(),
            max_grid_size: default_max_grid_size(),
        }
    }
}

/// Main configuration for obfs-scout.
///
/// # Example
///
/// ```rust
/// use obfs_scout::Config;
/// use obfs_scout::search::SearchMode;
///
/// let config = Config::default();
/// assert_eq!(config.engine.bin, "xray");
/// assert_eq!(config.search.mode, SearchMode::Smart);
/// config.validate().unwrap();
/// ```
///
/// ```rust,no_run
/// use obfs_scout::Config;
/// use std::path::Path;
///
/// let config = Config::from_file(Path::new("obfs-scout.toml"))?;
/// # Ok::<(), obfs_scout::Error>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Log level for output.
    #[serde(default)]
    pub loglevel: LogLevel,
    /// Log file path. None for stdout.
    #[serde(default)]
    pub logfile: Option<String>,
    /// Connection descriptor to search.
    #[serde(default)]
    pub base: Option<PathBuf>,
    /// Where to write the JSON results.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Engine invocation.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Search settings.
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    /// Returns [`Error::Config`] if the TOML is invalid.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.engine.bin.trim().is_empty() {
            return Err(Error::Config("engine bin must not be empty".to_string()));
        }
        PortAllocator::new(self.probe.port_base, self.probe.port_pool)?;
        if self.probe.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }
        if self.search.concurrency == 0 {
            return Err(Error::Config("concurrency must be positive".to_string()));
        }
        // Every engine in flight needs its own port and config file.
        if self.search.concurrency > usize::from(self.probe.port_pool) {
            return Err(Error::Config(format!(
                "concurrency {} exceeds port_pool {}",
                self.search.concurrency, self.probe.port_pool
            )));
        }
        if self.search.top_n == 0 {
            return Err(Error::Config("top_n must be positive".to_string()));
        }
        if self.search.mode != SearchMode::Quick && self.search.groups.is_empty() {
            return Err(Error::Config(format!(
                "{} mode needs at least one parameter group",
                self.search.mode
            )));
        }
        Ok(())
    }

    /// The engine invocation described by `[engine]`.
    pub fn engine_command(&self) -> EngineCommand {
        EngineCommand::new(self.engine.bin.clone(), self.engine.args.clone())
    }

    /// A port allocator over the configured pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a pool that does not fit in the port range.
    pub fn port_allocator(&self) -> Result<PortAllocator> {
        PortAllocator::new(self.probe.port_base, self.probe.port_pool)
    }

    /// Runner options described by `[engine]` and `[probe]`.
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            work_dir: self
                .engine
                .work_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            readiness: self.probe.readiness,
            settle_delay: Duration::from_millis(self.probe.settle_delay_ms),
            grace_period: Duration::from_millis(self.probe.grace_period_ms),
            check_url: self.probe.check_url.clone(),
            throughput_url: self.probe.throughput_url.clone(),
        }
    }

    /// Search settings described by `[probe]` and `[search]`.
    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            concurrency: self.search.concurrency,
            timeout: Duration::from_secs(self.probe.timeout_secs),
            measure_throughput: self.probe.measure_throughput,
            top_n: self.search.top_n,
            max_grid_size: self.search.max_grid_size,
        }
    }
}

/// Command-line arguments for obfs-scout.
///
/// Arguments override configuration file values.
///
/// # Options
///
/// | Option | Description |
/// |--------|-------------|
/// | `--base <FILE>` | Connection descriptor, TOML or JSON [env: OBFS_SCOUT_BASE] |
/// | `--mode <MODE>` | `smart`, `full` or `quick` |
/// | `--groups <LIST>` | Comma-separated parameter groups |
/// | `--concurrency <N>` | Probes in flight |
/// | `--timeout <SECS>` | Per-probe timeout |
/// | `--speed` | Measure throughput |
/// | `--engine <BIN>` | Engine executable [env: OBFS_SCOUT_ENGINE] |
/// | `--readiness <POLICY>` | `settle` or `poll` |
/// | `--output <FILE>` | Write JSON results |
/// | `--config <FILE>` | Config file [env: OBFS_SCOUT_CONFIG] [default: obfs-scout.toml] |
/// | `--generate_config <FILE>` | Write default config to file and exit |
/// | `--loglevel <LEVEL>` | DEBUG, INFO, NOTICE, WARN, ERROR |
/// | `--logfile <FILE>` | Log to file instead of stdout |
///
/// # Examples
///
/// ```bash
/// obfs-scout --base endpoint.toml --groups fragment,fingerprint --concurrency 5
/// obfs-scout --base endpoint.json --mode quick --speed --output results.json
/// obfs-scout --generate_config obfs-scout.toml
/// ```
#[derive(Parser, Debug)]
#[command(name = "obfs-scout")]
#[command(about = "Find obfuscation settings that get a tunnel through a censoring network")]
#[command(version)]
pub struct CliArgs {
    /// Connection descriptor file (TOML, or JSON by extension).
    #[arg(long, env = "OBFS_SCOUT_BASE")]
    pub base: Option<PathBuf>,

    /// Search mode: smart, full or quick.
    #[arg(long)]
    pub mode: Option<SearchMode>,

    /// Comma-separated parameter groups, e.g. "fragment,fingerprint,alpn".
    #[arg(long)]
    pub groups: Option<String>,

    /// Probes run in parallel.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-probe timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Also measure download throughput of working configurations.
    #[arg(long)]
    pub speed: bool,

    /// Proxy engine executable.
    #[arg(long, env = "OBFS_SCOUT_ENGINE")]
    pub engine: Option<String>,

    /// Readiness policy: settle or poll.
    #[arg(long)]
    pub readiness: Option<ReadinessPolicy>,

    /// Write all results as JSON to this file.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Write default config to file and exit.
    #[arg(long = "generate_config")]
    pub generate_config: Option<PathBuf>,

    /// Log verbosity (DEBUG, INFO, NOTICE, WARN, ERROR).
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Log to file instead of stdout.
    #[arg(long)]
    pub logfile: Option<String>,

    /// Path to configuration file.
    #[arg(
        long = "config",
        env = "OBFS_SCOUT_CONFIG",
        default_value = "obfs-scout.toml"
    )]
    pub config_file: PathBuf,
}

impl CliArgs {
    /// Apply CLI arguments to a configuration, overriding values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown log level or group name.
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(ref base) = self.base {
            config.base = Some(base.clone());
        }
        if let Some(mode) = self.mode {
            config.search.mode = mode;
        }
        if let Some(ref groups) = self.groups {
            config.search.groups = parse_groups(groups)?;
        }
        if let Some(concurrency) = self.concurrency {
            config.search.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.probe.timeout_secs = timeout;
        }
        if self.speed {
            config.probe.measure_throughput = true;
        }
        if let Some(ref engine) = self.engine {
            config.engine.bin = engine.clone();
        }
        if let Some(readiness) = self.readiness {
            config.probe.readiness = readiness;
        }
        if let Some(ref output) = self.output {
            config.output = Some(output.clone());
        }
        if let Some(ref loglevel) = self.loglevel {
            config.loglevel = loglevel.parse()?;
        }
        if let Some(ref logfile) = self.logfile {
            config.logfile = Some(logfile.clone());
        }
        Ok(())
    }
}

/// Load configuration from file and CLI arguments.
///
/// 1. Start with defaults
/// 2. Apply config file if it exists
/// 3. Apply environment and CLI arguments (override)
///
/// # Errors
///
/// Returns [`Error::Config`] if configuration is invalid.
pub fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = Config::default();

    if args.config_file.exists() {
        config = Config::from_file(&args.config_file)?;
    }

    args.apply_to(&mut config)?;
    config.validate()?;

    Ok(config)
}
