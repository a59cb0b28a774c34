//! # obfs-scout
//!
//! Finds obfuscation settings that let a proxy tunnel through a censoring
//! network, by actually trying them.
//!
//! # Overview
//!
//! Given one known-good connection descriptor (VLESS, VMess, Trojan or
//! Shadowsocks), obfs-scout generates variants of it that differ in
//! obfuscation parameters: TLS ClientHello fragmentation, uTLS fingerprint,
//! ALPN, Encrypted Client Hello, socket options and transport. Each variant
//! is probed by launching the xray engine with a generated config and
//! requesting a connectivity URL through its local SOCKS5 inbound. Working
//! variants are ranked by latency.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`base`] | Connection descriptors ([`BaseConfig`]) |
//! | [`params`] | Parameter space, groups, sweep/combine/grid generators |
//! | [`builder`] | Engine document generation |
//! | [`ports`] | Local port rotation |
//! | [`probe`] | Engine lifecycle and connectivity checks ([`ProbeRunner`]) |
//! | [`batch`] | Bounded-concurrency batches |
//! | [`search`] | Multi-phase search ([`SearchOrchestrator`]) |
//! | [`events`] | Progress events |
//! | [`config`] | Configuration management (TOML, CLI, environment) |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`logger`] | Logging infrastructure using tracing |
//!
//! # Search Pipeline
//!
//! ```text
//!   BaseConfig ──► params (variants) ──► builder (documents)
//!                                             │
//!                                             ▼
//!                      batch: Semaphore(concurrency) × ProbeRunner
//!                        port ─► write config ─► spawn xray ─► SOCKS5 check
//!                                             │
//!                                             ▼
//!                      search: baseline ─► sweep ─► winners ─► combine
//!                                             │
//!                                             ▼
//!                      SearchSession: ranked results, JSON export
//! ```
//!
//! # What This Library Does NOT Do
//!
//! - **Parse share links**: descriptors are TOML or JSON files
//! - **Run a proxy**: the engine only lives for the duration of a probe
//! - **Ship an engine**: an `xray` binary must be installed
//!
//! # Quick Start
//!
//! ```bash
//! # Smart search over the default groups
//! obfs-scout --base endpoint.toml
//!
//! # Quick search with throughput, results exported as JSON
//! obfs-scout --base endpoint.json --mode quick --speed --output results.json
//!
//! # Generate default configuration file
//! obfs-scout --generate_config obfs-scout.toml
//! ```
//!
//! # Security Considerations
//!
//! - Credentials in descriptors are held in [`base::Secret`] and cleared from
//!   memory on drop (using zeroize)
//! - Generated config files contain credentials. They are created exclusively
//!   with mode `0600` (a leftover file or link at the path is removed first)
//!   and removed after every probe, whatever its outcome

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod base;
pub mod batch;
pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod params;
pub mod ports;
pub mod probe;
pub mod search;

pub use base::{BaseConfig, SecurityMode, TransportKind};
pub use batch::{run_batch, BatchOptions};
pub use builder::{build, GeneratedDocument};
pub use config::{load_config, CliArgs, Config, LogLevel};
pub use error::{Error, Result};
pub use events::{EventSink, SearchEvent};
pub use params::{OverrideSet, ParamGroup, ParamKey, ParamValue, Variant};
pub use ports::PortAllocator;
pub use probe::{
    EngineCommand, Probe, ProbeFailure, ProbeResult, ProbeRunner, ReadinessPolicy, RunnerOptions,
};
pub use search::{SearchMode, SearchOrchestrator, SearchSession, SearchSettings, SessionSummary};
