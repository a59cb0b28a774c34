//! Subprocess-backed connectivity probes.
//!
//! A probe takes one [`GeneratedDocument`], runs the proxy engine against it
//! and reports whether traffic makes it through. Every network condition ends
//! up as data on the returned [`ProbeResult`]; nothing here returns an error.
//!
//! # Lifecycle
//!
//! ```text
//!   acquire port ──► write <work_dir>/obfs_scout_<port>.json
//!        │                       │
//!        │                 spawn engine ──(spawn error)──────────────┐
//!        │                       │                                   │
//!        │                 ready-wait ──(engine exited)───────┐      │
//!        │                       │                            │      │
//!        │            ┌──────────┴──────────┐                 │      │
//!        │            │ timeout budget      │                 │      │
//!        │            │  connectivity GET   │──(fail)───┐     │      │
//!        │            │  throughput GET?    │           │     │      │
//!        │            └──────────┬──────────┘           │     │      │
//!        │                       ▼                      ▼     ▼      ▼
//!        │                 ┌───────────────────────────────────────────┐
//!        └────────────────►│ cleanup: SIGTERM, grace, SIGKILL, unlink  │
//!                          └───────────────────────────────────────────┘
//! ```
//!
//! Cleanup always runs. Its outcome is captured in a [`CleanupOutcome`] and
//! logged, never escalated.
//!
//! # Readiness
//!
//! The engine gives no readiness signal. [`ReadinessPolicy::Settle`] sleeps a
//! fixed delay; [`ReadinessPolicy::Poll`] connects to the local port every
//! 50 ms until it accepts or the same delay elapses. Both notice an engine
//! that already exited.
//!
//! # Failure Strings
//!
//! | Failure | Rendered as |
//! |---------|-------------|
//! | [`EngineExited`](ProbeFailure::EngineExited) | `engine exited with code 1` |
//! | [`EngineSignaled`](ProbeFailure::EngineSignaled) | `engine terminated by signal` |
//! | [`Launch`](ProbeFailure::Launch) | `failed to launch engine: ...` |
//! | [`WriteConfig`](ProbeFailure::WriteConfig) | `failed to write config: ...` |
//! | [`Timeout`](ProbeFailure::Timeout) | `timeout` |
//! | [`Transport`](ProbeFailure::Transport) | `transport error: ...` |
//! | [`BadStatus`](ProbeFailure::BadStatus) | `HTTP 503` |
//! | [`Crashed`](ProbeFailure::Crashed) | `probe crashed: ...` |

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::builder::GeneratedDocument;
use crate::config::LogLevel;
use crate::error::{Error, Result};
use crate::params::OverrideSet;
use crate::plog_fmt;
use crate::ports::PortAllocator;

/// Placeholder in engine arguments replaced by the config file path.
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// Default connectivity target.
pub const DEFAULT_CHECK_URL: &str = "https://www.google.com/generate_204";

/// Default throughput target, about 1 MiB.
pub const DEFAULT_THROUGHPUT_URL: &str = "https://speed.cloudflare.com/__down?bytes=1048576";

/// Default settle delay before probing.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// Default time the engine gets to exit after SIGTERM.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    /// The engine exited before probing began.
    #[error("engine exited with code {code}")]
    EngineExited {
        /// Exit code of the engine.
        code: i32,
    },

    /// The engine was killed by a signal before probing began.
    #[error("engine terminated by signal")]
    EngineSignaled,

    /// The engine binary could not be started.
    #[error("failed to launch engine: {0}")]
    Launch(String),

    /// The config file could not be written.
    #[error("failed to write config: {0}")]
    WriteConfig(String),

    /// The connectivity check did not finish within the probe timeout.
    #[error("timeout")]
    Timeout,

    /// The connectivity request failed below HTTP.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connectivity target answered with something other than 200/204.
    #[error("HTTP {0}")]
    BadStatus(u16),

    /// The probe task panicked.
    #[error("probe crashed: {0}")]
    Crashed(String),
}

/// Outcome of probing one document. Immutable.
///
/// `success()` holds exactly when `latency_ms() >= 0`; the constructors are
/// the only way to build one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    overrides: OverrideSet,
    description: String,
    latency_ms: i64,
    throughput_mbps: f64,
    failure: Option<ProbeFailure>,
}

impl ProbeResult {
    /// A successful probe.
    pub fn succeeded(
        overrides: OverrideSet,
        description: impl Into<String>,
        latency_ms: u64,
        throughput_mbps: Option<f64>,
    ) -> Self {
        Self {
            overrides,
            description: description.into(),
            latency_ms: i64::try_from(latency_ms).unwrap_or(i64::MAX),
            throughput_mbps: throughput_mbps.unwrap_or(-1.0),
            failure: None,
        }
    }

    /// A failed probe.
    pub fn failed(
        overrides: OverrideSet,
        description: impl Into<String>,
        failure: ProbeFailure,
    ) -> Self {
        Self {
            overrides,
            description: description.into(),
            latency_ms: -1,
            throughput_mbps: -1.0,
            failure: Some(failure),
        }
    }

    /// A failed probe attributed to `document`.
    pub fn failed_for(document: &GeneratedDocument, failure: ProbeFailure) -> Self {
        Self::failed(
            document.overrides().clone(),
            document.description(),
            failure,
        )
    }

    /// The overrides that were probed.
    pub fn overrides(&self) -> &OverrideSet {
        &self.overrides
    }

    /// Human-readable description of the overrides.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the connectivity check passed.
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// Latency in milliseconds, `-1` on failure.
    pub fn latency_ms(&self) -> i64 {
        self.latency_ms
    }

    /// Latency of a successful probe.
    pub fn latency(&self) -> Option<u64> {
        u64::try_from(self.latency_ms).ok()
    }

    /// Throughput in Mbit/s, `-1.0` when not measured.
    pub fn throughput_mbps(&self) -> f64 {
        self.throughput_mbps
    }

    /// Why the probe failed.
    pub fn failure(&self) -> Option<&ProbeFailure> {
        self.failure.as_ref()
    }

    /// The failure rendered as text, empty on success.
    pub fn error(&self) -> String {
        self.failure
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

impl Serialize for ProbeResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ProbeResult", 6)?;
        s.serialize_field("params", &self.overrides)?;
        s.serialize_field("description", &self.description)?;
        s.serialize_field("success", &self.success())?;
        s.serialize_field("latency_ms", &self.latency_ms)?;
        s.serialize_field("speed_mbps", &self.throughput_mbps)?;
        s.serialize_field("error", &self.error())?;
        s.end()
    }
}

/// Something that can probe a generated document.
///
/// [`ProbeRunner`] is the real implementation; the batch executor and the
/// search orchestrator are generic over this trait.
pub trait Probe: Send + Sync + 'static {
    /// Probes one document. Never fails: every problem is a failed result.
    fn probe(
        &self,
        document: GeneratedDocument,
        timeout: Duration,
        measure_throughput: bool,
    ) -> impl Future<Output = ProbeResult> + Send;
}

/// How the runner decides the engine is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessPolicy {
    /// Sleep the settle delay, then check the engine is still alive.
    #[default]
    Settle,
    /// Poll the local port until it accepts, bounded by the settle delay.
    Poll,
}

impl fmt::Display for ReadinessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessPolicy::Settle => write!(f, "settle"),
            ReadinessPolicy::Poll => write!(f, "poll"),
        }
    }
}

impl FromStr for ReadinessPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "settle" => Ok(ReadinessPolicy::Settle),
            "poll" => Ok(ReadinessPolicy::Poll),
            _ => Err(Error::Config(format!("unknown readiness policy: {}", s))),
        }
    }
}

/// The engine executable and its argument template.
///
/// Every [`CONFIG_PLACEHOLDER`] in the arguments is replaced with the config
/// file path. Without a placeholder the path is appended as the last
/// argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    program: String,
    args: Vec<String>,
}

impl EngineCommand {
    /// An arbitrary engine invocation.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `<bin> run -c {config}`.
    pub fn xray(bin: impl Into<String>) -> Self {
        Self::new(
            bin,
            vec!["run".into(), "-c".into(), CONFIG_PLACEHOLDER.into()],
        )
    }

    /// The program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for a config file at `config`.
    pub fn args_for(&self, config: &Path) -> Vec<String> {
        let path = config.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(CONFIG_PLACEHOLDER, &path))
            .collect();
        if !self.args.iter().any(|a| a.contains(CONFIG_PLACEHOLDER)) {
            args.push(path.into_owned());
        }
        args
    }

    fn command(&self, config: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self::xray("xray")
    }
}

/// Runner settings other than the engine and the port pool.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Directory for the per-probe config files.
    pub work_dir: PathBuf,
    /// Readiness strategy.
    pub readiness: ReadinessPolicy,
    /// Settle delay, or polling budget under [`ReadinessPolicy::Poll`].
    pub settle_delay: Duration,
    /// Time the engine gets to exit after SIGTERM.
    pub grace_period: Duration,
    /// Connectivity target.
    pub check_url: String,
    /// Throughput target.
    pub throughput_url: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            readiness: ReadinessPolicy::Settle,
            settle_delay: DEFAULT_SETTLE_DELAY,
            grace_period: DEFAULT_GRACE_PERIOD,
            check_url: DEFAULT_CHECK_URL.to_string(),
            throughput_url: DEFAULT_THROUGHPUT_URL.to_string(),
        }
    }
}

/// What happened to the engine process during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTeardown {
    /// It had already exited on its own.
    AlreadyExited,
    /// It exited within the grace period after SIGTERM.
    Terminated,
    /// It had to be killed.
    Killed,
    /// Termination failed.
    Failed(String),
}

/// What happened to the config file during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRemoval {
    /// Deleted.
    Removed,
    /// Already gone.
    Missing,
    /// Deletion failed.
    Failed(String),
}

/// Result of the best-effort teardown of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Engine process outcome, `None` if it was never spawned.
    pub process: Option<ProcessTeardown>,
    /// Config file outcome.
    pub config_file: FileRemoval,
}

impl CleanupOutcome {
    /// Whether anything went wrong.
    pub fn has_failures(&self) -> bool {
        matches!(self.process, Some(ProcessTeardown::Failed(_)))
            || matches!(self.config_file, FileRemoval::Failed(_))
    }
}

/// Probes documents by running the engine as a child process.
#[derive(Debug, Clone)]
pub struct ProbeRunner {
    engine: EngineCommand,
    ports: Arc<PortAllocator>,
    options: RunnerOptions,
}

impl ProbeRunner {
    /// Creates a runner.
    pub fn new(engine: EngineCommand, ports: Arc<PortAllocator>, options: RunnerOptions) -> Self {
        Self {
            engine,
            ports,
            options,
        }
    }

    /// The runner's settings.
    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Path of the config file for `port`.
    pub fn config_path(&self, port: u16) -> PathBuf {
        self.options
            .work_dir
            .join(format!("obfs_scout_{}.json", port))
    }

    async fn run(
        &self,
        document: GeneratedDocument,
        timeout: Duration,
        measure_throughput: bool,
    ) -> ProbeResult {
        let port = self.ports.next();
        let document = document.with_local_port(port);
        let path = self.config_path(port);

        let outcome = match self.materialize(&document, &path).await {
            Err(failure) => {
                discard_unspawned(port, &path).await;
                Err(failure)
            }
            Ok(()) => match self.engine.command(&path).spawn() {
                Err(e) => {
                    discard_unspawned(port, &path).await;
                    Err(ProbeFailure::Launch(e.to_string()))
                }
                Ok(mut child) => {
                    plog_fmt!(
                        LogLevel::Debug,
                        "Probe on port {} started engine pid {:?} for '{}'",
                        port,
                        child.id(),
                        document.description(),
                    );
                    let outcome = self
                        .exercise(&mut child, port, timeout, measure_throughput)
                        .await;
                    let cleanup = CleanupOutcome {
                        process: Some(terminate(&mut child, self.options.grace_period).await),
                        config_file: remove_config(&path).await,
                    };
                    log_cleanup(port, &cleanup);
                    outcome
                }
            },
        };

        match outcome {
            Ok((latency_ms, throughput)) => ProbeResult::succeeded(
                document.overrides().clone(),
                document.description(),
                latency_ms,
                throughput,
            ),
            Err(failure) => ProbeResult::failed_for(&document, failure),
        }
    }

    async fn materialize(
        &self,
        document: &GeneratedDocument,
        path: &Path,
    ) -> std::result::Result<(), ProbeFailure> {
        let bytes = document
            .to_bytes()
            .map_err(|e| ProbeFailure::WriteConfig(e.to_string()))?;
        let write = |e: std::io::Error| ProbeFailure::WriteConfig(e.to_string());

        // A leftover file or link at this path is never written through.
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(write(e)),
            _ => {}
        }

        let mut open = tokio::fs::OpenOptions::new();
        open.write(true).create_new(true);
        #[cfg(unix)]
        open.mode(0o600);
        let mut file = open.open(path).await.map_err(write)?;
        file.write_all(&bytes).await.map_err(write)?;
        file.sync_all().await.map_err(write)
    }

    async fn exercise(
        &self,
        child: &mut Child,
        port: u16,
        timeout: Duration,
        measure_throughput: bool,
    ) -> std::result::Result<(u64, Option<f64>), ProbeFailure> {
        self.wait_ready(child, port).await?;

        let client = socks_client(port)?;
        let deadline = Instant::now() + timeout;

        let latency_ms = match tokio::time::timeout_at(
            deadline,
            check_connectivity(&client, &self.options.check_url),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ProbeFailure::Timeout),
        };

        let throughput = if measure_throughput {
            tokio::time::timeout_at(
                deadline,
                measure_download(&client, &self.options.throughput_url),
            )
            .await
            .ok()
            .flatten()
        } else {
            None
        };

        Ok((latency_ms, throughput))
    }

    async fn wait_ready(
        &self,
        child: &mut Child,
        port: u16,
    ) -> std::result::Result<(), ProbeFailure> {
        match self.options.readiness {
            ReadinessPolicy::Settle => {
                tokio::time::sleep(self.options.settle_delay).await;
                check_alive(child)
            }
            ReadinessPolicy::Poll => {
                let deadline = Instant::now() + self.options.settle_delay;
                loop {
                    check_alive(child)?;
                    if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                        return Ok(());
                    }
                    if Instant::now() >= deadline {
                        // Budget spent without a listener; let the request decide.
                        return check_alive(child);
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

impl Probe for ProbeRunner {
    fn probe(
        &self,
        document: GeneratedDocument,
        timeout: Duration,
        measure_throughput: bool,
    ) -> impl Future<Output = ProbeResult> + Send {
        self.run(document, timeout, measure_throughput)
    }
}

fn check_alive(child: &mut Child) -> std::result::Result<(), ProbeFailure> {
    match child.try_wait() {
        Ok(Some(status)) => Err(exit_failure(status)),
        Ok(None) => Ok(()),
        Err(e) => {
            plog_fmt!(LogLevel::Debug, "Could not poll engine status: {}", e);
            Ok(())
        }
    }
}

fn exit_failure(status: ExitStatus) -> ProbeFailure {
    match status.code() {
        Some(code) => ProbeFailure::EngineExited { code },
        None => ProbeFailure::EngineSignaled,
    }
}

fn socks_client(port: u16) -> std::result::Result<reqwest::Client, ProbeFailure> {
    let proxy = reqwest::Proxy::all(format!("socks5h://127.0.0.1:{}", port))
        .map_err(|e| ProbeFailure::Transport(error_chain(&e)))?;
    reqwest::Client::builder()
        .proxy(proxy)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ProbeFailure::Transport(error_chain(&e)))
}

async fn check_connectivity(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<u64, ProbeFailure> {
    let start = Instant::now();
    let response = client.get(url).send().await.map_err(classify)?;
    let status = response.status();
    response.bytes().await.map_err(classify)?;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match status.as_u16() {
        200 | 204 => Ok(latency_ms),
        other => Err(ProbeFailure::BadStatus(other)),
    }
}

async fn measure_download(client: &reqwest::Client, url: &str) -> Option<f64> {
    let start = Instant::now();
    let response = client.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body = response.bytes().await.ok()?;
    let seconds = start.elapsed().as_secs_f64();
    if seconds <= 0.0 {
        return None;
    }
    let mbps = body.len() as f64 * 8.0 / (seconds * 1e6);
    Some((mbps * 100.0).round() / 100.0)
}

fn classify(e: reqwest::Error) -> ProbeFailure {
    if e.is_timeout() {
        ProbeFailure::Timeout
    } else {
        ProbeFailure::Transport(error_chain(&e))
    }
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

async fn terminate(child: &mut Child, grace: Duration) -> ProcessTeardown {
    match child.try_wait() {
        Ok(Some(_)) => return ProcessTeardown::AlreadyExited,
        Ok(None) => {}
        Err(e) => return ProcessTeardown::Failed(e.to_string()),
    }

    send_terminate(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_)) => ProcessTeardown::Terminated,
        Ok(Err(e)) => ProcessTeardown::Failed(e.to_string()),
        Err(_) => match child.kill().await {
            Ok(()) => ProcessTeardown::Killed,
            Err(e) => ProcessTeardown::Failed(e.to_string()),
        },
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Ok(pid) = libc::pid_t::try_from(pid) {
            // SAFETY: pid is our own child and has not been reaped yet.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

async fn remove_config(path: &Path) -> FileRemoval {
    match tokio::fs::remove_file(path).await {
        Ok(()) => FileRemoval::Removed,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileRemoval::Missing,
        Err(e) => FileRemoval::Failed(e.to_string()),
    }
}

/// Cleanup for a probe whose engine never started.
async fn discard_unspawned(port: u16, path: &Path) {
    let cleanup = CleanupOutcome {
        process: None,
        config_file: remove_config(path).await,
    };
    log_cleanup(port, &cleanup);
}

fn log_cleanup(port: u16, cleanup: &CleanupOutcome) {
    let level = if cleanup.has_failures() {
        LogLevel::Warn
    } else {
        LogLevel::Debug
    };
    plog_fmt!(level, "Probe on port {} cleanup: {:?}", port, cleanup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build, DEFAULT_LOCAL_PORT};
    use crate::params::{self, ParamKey, ParamValue, Variant};
    use crate::BaseConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const NO_CONTENT: &[u8] =
        b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAVAILABLE: &[u8] =
        b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    fn base() -> BaseConfig {
        BaseConfig::from_toml_str(
            r#"
            protocol = "trojan"
            address = "203.0.113.9"
            port = 443
            password = "pw"
            "#,
        )
        .unwrap()
    }

    fn document(variant: &Variant) -> GeneratedDocument {
        build(&base(), variant, DEFAULT_LOCAL_PORT).unwrap()
    }

    fn options(dir: &Path, readiness: ReadinessPolicy, settle_ms: u64) -> RunnerOptions {
        RunnerOptions {
            work_dir: dir.to_path_buf(),
            readiness,
            settle_delay: Duration::from_millis(settle_ms),
            grace_period: Duration::from_millis(500),
            check_url: "http://probe.test/generate_204".to_string(),
            throughput_url: "http://probe.test/__down?bytes=65536".to_string(),
        }
    }

    fn sh(script: &str) -> EngineCommand {
        EngineCommand::new(
            "sh",
            vec!["-c".into(), script.into(), CONFIG_PLACEHOLDER.into()],
        )
    }

    /// Minimal SOCKS5 server standing in for the engine's inbound.
    ///
    /// Accepts CONNECT for any target, reads one HTTP request head and
    /// answers with `route(head)` after `delay`. An empty answer closes the
    /// connection instead.
    async fn socks_stub(delay: Duration, route: fn(&str) -> Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = serve_socks(&mut stream, delay, route).await;
                });
            }
        });
        port
    }

    async fn serve_socks(
        stream: &mut TcpStream,
        delay: Duration,
        route: fn(&str) -> Vec<u8>,
    ) -> std::io::Result<()> {
        let mut greeting = [0u8; 2];
        stream.read_exact(&mut greeting).await?;
        let mut methods = vec![0u8; greeting[1] as usize];
        stream.read_exact(&mut methods).await?;
        stream.write_all(&[0x05, 0x00]).await?;

        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await?;
        let addr_len = match request[3] {
            0x01 => 4,
            0x04 => 16,
            0x03 => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                len[0] as usize
            }
            _ => return Ok(()),
        };
        let mut rest = vec![0u8; addr_len + 2];
        stream.read_exact(&mut rest).await?;
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await?;

        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            head.extend_from_slice(&buf[..n]);
        }

        tokio::time::sleep(delay).await;
        let answer = route(&String::from_utf8_lossy(&head));
        if !answer.is_empty() {
            stream.write_all(&answer).await?;
        }
        stream.shutdown().await
    }

    fn always_no_content(_: &str) -> Vec<u8> {
        NO_CONTENT.to_vec()
    }

    fn always_unavailable(_: &str) -> Vec<u8> {
        UNAVAILABLE.to_vec()
    }

    fn with_download(head: &str) -> Vec<u8> {
        if head.contains("__down") {
            let mut answer =
                b"HTTP/1.1 200 OK\r\nContent-Length: 65536\r\nConnection: close\r\n\r\n".to_vec();
            answer.extend(std::iter::repeat(b'x').take(65536));
            answer
        } else {
            NO_CONTENT.to_vec()
        }
    }

    fn download_dropped(head: &str) -> Vec<u8> {
        if head.contains("__down") {
            Vec::new()
        } else {
            NO_CONTENT.to_vec()
        }
    }

    #[test]
    fn test_result_invariant() {
        let ok = ProbeResult::succeeded(OverrideSet::new(), "baseline", 42, None);
        assert!(ok.success());
        assert_eq!(ok.latency_ms(), 42);
        assert_eq!(ok.latency(), Some(42));
        assert_eq!(ok.throughput_mbps(), -1.0);
        assert_eq!(ok.error(), "");

        let zero = ProbeResult::succeeded(OverrideSet::new(), "fast", 0, Some(12.5));
        assert!(zero.success());
        assert_eq!(zero.latency_ms(), 0);
        assert_eq!(zero.throughput_mbps(), 12.5);

        let bad = ProbeResult::failed(OverrideSet::new(), "x", ProbeFailure::Timeout);
        assert!(!bad.success());
        assert_eq!(bad.latency_ms(), -1);
        assert_eq!(bad.latency(), None);
        assert_eq!(bad.error(), "timeout");
    }

    #[test]
    fn test_failure_strings() {
        assert_eq!(
            ProbeFailure::EngineExited { code: 1 }.to_string(),
            "engine exited with code 1"
        );
        assert_eq!(ProbeFailure::BadStatus(503).to_string(), "HTTP 503");
        assert_eq!(
            ProbeFailure::Transport("refused".into()).to_string(),
            "transport error: refused"
        );
        assert_eq!(
            ProbeFailure::Crashed("boom".into()).to_string(),
            "probe crashed: boom"
        );
    }

    #[test]
    fn test_result_json_shape() {
        let overrides = OverrideSet::single(ParamKey::Fingerprint, ParamValue::Text("chrome"));
        let result = ProbeResult::succeeded(overrides, "fingerprint=chrome", 87, None);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "params": { "fingerprint": "chrome" },
                "description": "fingerprint=chrome",
                "success": true,
                "latency_ms": 87,
                "speed_mbps": -1.0,
                "error": "",
            })
        );
    }

    #[test]
    fn test_engine_args() {
        let xray = EngineCommand::default();
        assert_eq!(xray.program(), "xray");
        assert_eq!(
            xray.args_for(Path::new("/tmp/obfs_scout_20000.json")),
            vec!["run", "-c", "/tmp/obfs_scout_20000.json"]
        );

        let bare = EngineCommand::new("engine", vec!["--quiet".into()]);
        assert_eq!(
            bare.args_for(Path::new("/w/c.json")),
            vec!["--quiet", "/w/c.json"]
        );
    }

    #[test]
    fn test_readiness_parse() {
        assert_eq!("poll".parse::<ReadinessPolicy>().unwrap(), ReadinessPolicy::Poll);
        assert_eq!(
            " Settle ".parse::<ReadinessPolicy>().unwrap(),
            ReadinessPolicy::Settle
        );
        assert!("eventually".parse::<ReadinessPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_write_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(39100, 1).unwrap()),
            options(&missing, ReadinessPolicy::Settle, 10),
        );

        let result = runner
            .probe(document(&params::baseline()), Duration::from_secs(1), false)
            .await;
        assert!(!result.success());
        assert!(result.error().starts_with("failed to write config"));
    }

    #[tokio::test]
    async fn test_launch_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            EngineCommand::xray("/nonexistent/obfs-scout-engine"),
            Arc::new(PortAllocator::new(39200, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Settle, 10),
        );

        let result = runner
            .probe(document(&params::baseline()), Duration::from_secs(1), false)
            .await;
        assert!(matches!(result.failure(), Some(ProbeFailure::Launch(_))));
        assert_eq!(result.latency_ms(), -1);
        assert!(!runner.config_path(39200).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_exit_code_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("exit 1"),
            Arc::new(PortAllocator::new(39300, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Settle, 300),
        );

        let result = runner
            .probe(document(&params::baseline()), Duration::from_secs(2), false)
            .await;
        assert!(!result.success());
        assert_eq!(result.latency_ms(), -1);
        assert!(result.error().contains('1'), "{}", result.error());
        assert_eq!(result.failure(), Some(&ProbeFailure::EngineExited { code: 1 }));
        assert!(!runner.config_path(39300).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_exit_noticed_while_polling() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("exit 3"),
            Arc::new(PortAllocator::new(39400, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Poll, 2000),
        );

        let result = runner
            .probe(document(&params::baseline()), Duration::from_secs(2), false)
            .await;
        assert_eq!(result.failure(), Some(&ProbeFailure::EngineExited { code: 3 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_probe_through_socks() {
        let port = socks_stub(Duration::from_millis(50), always_no_content).await;
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(port, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Poll, 2000),
        );

        let variant = Variant::new(
            OverrideSet::single(ParamKey::Fingerprint, ParamValue::Text("firefox")),
            "fingerprint=firefox",
        );
        let result = runner
            .probe(document(&variant), Duration::from_secs(5), false)
            .await;

        assert!(result.success(), "{:?}", result);
        assert!(result.latency_ms() >= 50, "{}", result.latency_ms());
        assert!(result.latency_ms() < 2000, "{}", result.latency_ms());
        assert_eq!(result.error(), "");
        assert_eq!(result.throughput_mbps(), -1.0);
        assert_eq!(result.description(), "fingerprint=firefox");
        assert_eq!(result.overrides(), &variant.overrides);
        assert!(!runner.config_path(port).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bad_status_is_failure() {
        let port = socks_stub(Duration::ZERO, always_unavailable).await;
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(port, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Poll, 2000),
        );

        let result = runner
            .probe(document(&params::baseline()), Duration::from_secs(5), false)
            .await;
        assert_eq!(result.failure(), Some(&ProbeFailure::BadStatus(503)));
        assert_eq!(result.latency_ms(), -1);
        assert!(!runner.config_path(port).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_bounds_connectivity() {
        let port = socks_stub(Duration::from_secs(5), always_no_content).await;
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(port, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Poll, 2000),
        );

        let result = runner
            .probe(
                document(&params::baseline()),
                Duration::from_millis(300),
                false,
            )
            .await;
        assert_eq!(result.failure(), Some(&ProbeFailure::Timeout));
        assert!(!runner.config_path(port).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_throughput_measured() {
        let port = socks_stub(Duration::ZERO, with_download).await;
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(port, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Poll, 2000),
        );

        let result = runner
            .probe(document(&params::baseline()), Duration::from_secs(5), true)
            .await;
        assert!(result.success(), "{:?}", result);
        assert!(result.throughput_mbps() > 0.0, "{}", result.throughput_mbps());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_throughput_failure_is_swallowed() {
        let port = socks_stub(Duration::ZERO, download_dropped).await;
        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(port, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Poll, 2000),
        );

        let result = runner
            .probe(document(&params::baseline()), Duration::from_secs(5), true)
            .await;
        assert!(result.success(), "{:?}", result);
        assert!(result.latency_ms() >= 0);
        assert_eq!(result.throughput_mbps(), -1.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_teardown_escalates_to_kill() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let outcome = terminate(&mut child, Duration::from_millis(200)).await;
        assert_eq!(outcome, ProcessTeardown::Killed);

        let mut gone = Command::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
        gone.wait().await.unwrap();
        assert_eq!(
            terminate(&mut gone, Duration::from_millis(200)).await,
            ProcessTeardown::AlreadyExited
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_config_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(39500, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Settle, 10),
        );
        let path = runner.config_path(39500);

        runner
            .materialize(&document(&params::baseline()), &path)
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"pw\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_config_write_replaces_planted_link() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("elsewhere.txt");
        std::fs::write(&target, b"untouched").unwrap();
        let runner = ProbeRunner::new(
            sh("sleep 30"),
            Arc::new(PortAllocator::new(39600, 1).unwrap()),
            options(dir.path(), ReadinessPolicy::Settle, 10),
        );
        let path = runner.config_path(39600);
        std::os::unix::fs::symlink(&target, &path).unwrap();

        runner
            .materialize(&document(&params::baseline()), &path)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"untouched");
        let meta = std::fs::symlink_metadata(&path).unwrap();
        assert!(meta.file_type().is_file());
    }

    #[tokio::test]
    async fn test_remove_config_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obfs_scout_1.json");
        tokio::fs::write(&path, b"{}").await.unwrap();
        assert_eq!(remove_config(&path).await, FileRemoval::Removed);
        assert_eq!(remove_config(&path).await, FileRemoval::Missing);
    }
}
