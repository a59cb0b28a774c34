//! Error types for obfs-scout.
//!
//! This module defines the [`enum@Error`] enum for the conditions that abort a
//! search run. Network conditions never show up here: a probe that times out,
//! hits a transport error, or whose engine dies early is recorded as data on
//! [`ProbeResult`](crate::ProbeResult) through
//! [`ProbeFailure`](crate::ProbeFailure).
//!
//! # Error Categories
//!
//! ```text
//!   Error
//!   ├── Io              ◄── Reading config/base files, writing exports
//!   ├── Config          ◄── Invalid settings or an unbuildable document
//!   ├── BaseConfig      ◄── Undecodable connection descriptor
//!   ├── Serialization   ◄── JSON encoding/decoding failures
//!   └── GridTooLarge    ◄── Full-grid search exceeds the configured bound
//! ```
//!
//! # Recovery Guide
//!
//! | Error | Recoverable | Recommended Action |
//! |-------|-------------|-------------------|
//! | [`Io`](Error::Io) | Sometimes | Check paths and permissions |
//! | [`Config`](Error::Config) | No | Fix the configuration file or flags |
//! | [`BaseConfig`](Error::BaseConfig) | No | Fix the connection descriptor |
//! | [`Serialization`](Error::Serialization) | No | Check the input document |
//! | [`GridTooLarge`](Error::GridTooLarge) | No | Request fewer groups or raise the limit |
//!
//! # Example
//!
//! ```rust
//! use obfs_scout::{BaseConfig, Error};
//!
//! let err = BaseConfig::from_toml_str("protocol = \"wireguard\"").unwrap_err();
//! assert!(matches!(err, Error::BaseConfig(_)));
//! ```

use thiserror::Error;

/// Errors that abort an obfs-scout operation.
///
/// Only structurally invalid input ends up here. Everything that can go
/// wrong while probing a single configuration is captured per probe.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    ///
    /// Raised for invalid settings and for documents that cannot be built
    /// from the given base configuration (for example REALITY security on a
    /// protocol that does not support it).
    #[error("configuration error: {0}")]
    Config(String),

    /// The connection descriptor could not be decoded.
    ///
    /// This includes unknown protocol variants, unknown transport kinds and
    /// missing required fields.
    #[error("invalid base configuration: {0}")]
    BaseConfig(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A full-grid search would run more probes than allowed.
    #[error("full grid has {size} combinations, limit is {limit}")]
    GridTooLarge {
        /// Number of combinations the requested groups produce.
        size: usize,
        /// Configured upper bound.
        limit: usize,
    },
}

/// Result type alias for obfs-scout operations.
pub type Result<T> = std::result::Result<T, Error>;
