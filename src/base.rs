//! Normalized connection descriptors.
//!
//! A [`BaseConfig`] is the immutable input of every search: one tunnel
//! endpoint with its protocol, credentials, transport and security settings.
//! It is produced by an external normalizer (for example a proxy-URI parser)
//! and handed to obfs-scout as TOML or JSON.
//!
//! # Protocols
//!
//! The descriptor is a closed union tagged by the `protocol` field:
//!
//! | `protocol` | Credentials | Stream settings |
//! |------------|-------------|-----------------|
//! | `vless` | `uuid`, optional `flow` | yes |
//! | `vmess` | `uuid`, `alter_id`, `cipher` | yes |
//! | `trojan` | `password` | yes |
//! | `shadowsocks` | `method`, `password` | no (plain TCP) |
//!
//! Any other `protocol` value is rejected while decoding.
//!
//! # Example
//!
//! ```rust
//! use obfs_scout::{BaseConfig, SecurityMode, TransportKind};
//!
//! let base = BaseConfig::from_toml_str(r#"
//!     protocol = "vless"
//!     address = "edge.example.net"
//!     port = 443
//!     uuid = "0c7b5b0e-8d3e-4c55-9d8e-1d2f3a4b5c6d"
//!     transport = "ws"
//!     security = "tls"
//!     path = "/ray"
//! "#).unwrap();
//!
//! assert_eq!(base.protocol_name(), "vless");
//! let stream = base.stream().unwrap();
//! assert_eq!(stream.transport, Some(TransportKind::Ws));
//! assert_eq!(stream.security, SecurityMode::Tls);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// A credential string that is redacted in debug output and cleared on drop.
///
/// # Example
///
/// ```rust
/// use obfs_scout::base::Secret;
///
/// let secret = Secret::new("hunter2");
/// assert_eq!(secret.expose(), "hunter2");
/// assert!(!format!("{:?}", secret).contains("hunter2"));
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the credential for placement into an engine document.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

/// Transport kind of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP stream.
    Tcp,
    /// WebSocket.
    Ws,
    /// gRPC.
    Grpc,
    /// HTTP/2.
    H2,
    /// Chunked-HTTP transport.
    Xhttp,
}

impl TransportKind {
    /// Returns the engine name of this transport.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Ws => "ws",
            TransportKind::Grpc => "grpc",
            TransportKind::H2 => "h2",
            TransportKind::Xhttp => "xhttp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(TransportKind::Tcp),
            "ws" => Ok(TransportKind::Ws),
            "grpc" => Ok(TransportKind::Grpc),
            "h2" => Ok(TransportKind::H2),
            "xhttp" => Ok(TransportKind::Xhttp),
            _ => Err(Error::Config(format!("unknown transport: {}", s))),
        }
    }
}

/// Security layer of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// No encryption layer.
    None,
    /// Standard TLS.
    #[default]
    Tls,
    /// REALITY (SNI-spoofing handshake). VLESS only.
    Reality,
}

/// Transport and security fields shared by VLESS, VMess and Trojan.
///
/// Optional fields fall back to compiled-in defaults in the
/// [`builder`](crate::builder) when neither the descriptor nor an override
/// supplies them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamParams {
    /// Transport kind. Defaults depend on the protocol.
    #[serde(default)]
    pub transport: Option<TransportKind>,
    /// Security layer.
    #[serde(default)]
    pub security: SecurityMode,
    /// TLS/REALITY server name.
    #[serde(default)]
    pub sni: Option<String>,
    /// HTTP host header for ws/h2/xhttp.
    #[serde(default)]
    pub host: Option<String>,
    /// Request path, or gRPC service name.
    #[serde(default)]
    pub path: Option<String>,
    /// TLS fingerprint.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Comma-joined ALPN list, e.g. `"h2,http/1.1"`.
    #[serde(default)]
    pub alpn: Option<String>,
    /// Skip certificate verification.
    #[serde(default)]
    pub allow_insecure: bool,
    /// REALITY public key.
    #[serde(default)]
    pub public_key: Option<String>,
    /// REALITY short id.
    #[serde(default)]
    pub short_id: Option<String>,
    /// Fragment length range already present on the endpoint.
    #[serde(default)]
    pub fragment_length: Option<String>,
    /// Fragment interval range already present on the endpoint.
    #[serde(default)]
    pub fragment_interval: Option<String>,
    /// Fragment packet policy already present on the endpoint.
    #[serde(default)]
    pub fragment_packets: Option<String>,
}

/// VLESS endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VlessConfig {
    /// Server address.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// User id.
    pub uuid: Secret,
    /// Flow control for REALITY, e.g. `xtls-rprx-vision`.
    #[serde(default)]
    pub flow: Option<String>,
    /// Stream settings.
    #[serde(flatten)]
    pub stream: StreamParams,
}

/// VMess endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VmessConfig {
    /// Server address.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// User id.
    pub uuid: Secret,
    /// Legacy alter id.
    #[serde(default)]
    pub alter_id: u32,
    /// Payload cipher.
    #[serde(default = "default_vmess_cipher")]
    pub cipher: String,
    /// Stream settings.
    #[serde(flatten)]
    pub stream: StreamParams,
}

fn default_vmess_cipher() -> String {
    "auto".to_string()
}

/// Trojan endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrojanConfig {
    /// Server address.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// Shared password.
    pub password: Secret,
    /// Stream settings.
    #[serde(flatten)]
    pub stream: StreamParams,
}

/// Shadowsocks endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShadowsocksConfig {
    /// Server address.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// AEAD method, e.g. `chacha20-ietf-poly1305`.
    pub method: String,
    /// Shared password.
    pub password: Secret,
}

/// A normalized connection descriptor, tagged by `protocol`.
///
/// Immutable once decoded. Dispatch sites match exhaustively, so a new
/// protocol variant does not compile until every site handles it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum BaseConfig {
    /// VLESS.
    Vless(VlessConfig),
    /// VMess.
    Vmess(VmessConfig),
    /// Trojan.
    Trojan(TrojanConfig),
    /// Shadowsocks.
    Shadowsocks(ShadowsocksConfig),
}

impl BaseConfig {
    /// Decodes a descriptor from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BaseConfig`] for unknown protocols, unknown transport
    /// or security names, and missing required fields.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::BaseConfig(e.to_string()))
    }

    /// Decodes a descriptor from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BaseConfig`] on the same conditions as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::BaseConfig(e.to_string()))
    }

    /// Reads a descriptor file. Files ending in `.json` are decoded as JSON,
    /// everything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::BaseConfig`] if it cannot be decoded.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Protocol name as used in engine documents.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            BaseConfig::Vless(_) => "vless",
            BaseConfig::Vmess(_) => "vmess",
            BaseConfig::Trojan(_) => "trojan",
            BaseConfig::Shadowsocks(_) => "shadowsocks",
        }
    }

    /// Server address.
    pub fn address(&self) -> &str {
        match self {
            BaseConfig::Vless(c) => &c.address,
            BaseConfig::Vmess(c) => &c.address,
            BaseConfig::Trojan(c) => &c.address,
            BaseConfig::Shadowsocks(c) => &c.address,
        }
    }

    /// Server port.
    pub fn port(&self) -> u16 {
        match self {
            BaseConfig::Vless(c) => c.port,
            BaseConfig::Vmess(c) => c.port,
            BaseConfig::Trojan(c) => c.port,
            BaseConfig::Shadowsocks(c) => c.port,
        }
    }

    /// Stream settings, absent for Shadowsocks.
    pub fn stream(&self) -> Option<&StreamParams> {
        match self {
            BaseConfig::Vless(c) => Some(&c.stream),
            BaseConfig::Vmess(c) => Some(&c.stream),
            BaseConfig::Trojan(c) => Some(&c.stream),
            BaseConfig::Shadowsocks(_) => None,
        }
    }
}
