//! Engine configuration synthesis.
//!
//! [`build`] turns a [`BaseConfig`], a parameter [`Variant`] and a local port
//! into a complete engine document: a SOCKS5 inbound on loopback plus one
//! protocol-specific outbound carrying the requested obfuscation settings.
//!
//! # Document Layout
//!
//! ```text
//! {
//!   "log":       { "loglevel": "warning" },
//!   "inbounds":  [ socks, 127.0.0.1:<port>, noauth, udp ],
//!   "outbounds": [ {
//!       "protocol": vless | vmess | trojan | shadowsocks,
//!       "settings": { vnext | servers },
//!       "streamSettings": {
//!           "network": tcp | ws | grpc | h2 | xhttp,
//!           "<transport>Settings": { path, host, serviceName, mode },
//!           "security": none | tls | reality,
//!           "tlsSettings" | "realitySettings": { ... },
//!           "sockopt": { fragment, tcp tuning }
//!       }
//!   } ]
//! }
//! ```
//!
//! # Precedence
//!
//! For every field: explicit override, then the base configuration's own
//! value, then a compiled-in default. Raw TCP tuning flags have no defaults
//! and appear only when overridden.
//!
//! # Example
//!
//! ```rust
//! use obfs_scout::builder::build;
//! use obfs_scout::params::{ParamKey, ParamValue, OverrideSet, Variant};
//! use obfs_scout::BaseConfig;
//!
//! let base = BaseConfig::from_toml_str(r#"
//!     protocol = "trojan"
//!     address = "203.0.113.7"
//!     port = 443
//!     password = "secret"
//! "#).unwrap();
//!
//! let variant = Variant::new(
//!     OverrideSet::single(ParamKey::Fingerprint, ParamValue::Text("firefox")),
//!     "fingerprint=firefox",
//! );
//! let doc = build(&base, &variant, 10808).unwrap();
//! assert_eq!(
//!     doc.body()["outbounds"][0]["streamSettings"]["tlsSettings"]["fingerprint"],
//!     "firefox"
//! );
//! ```

use serde_json::{json, Map, Value};

use crate::base::{BaseConfig, SecurityMode, StreamParams, TransportKind};
use crate::error::{Error, Result};
use crate::params::{OverrideSet, ParamKey, Variant};

/// Placeholder inbound port for documents whose real port is assigned at probe time.
pub const DEFAULT_LOCAL_PORT: u16 = 10808;

/// Fragment packet policy used when only other fragment fields are set.
pub const DEFAULT_FRAGMENT_PACKETS: &str = "tlshello";
/// Fragment length used when only other fragment fields are set.
pub const DEFAULT_FRAGMENT_LENGTH: &str = "100-200";
/// Fragment interval used when only other fragment fields are set.
pub const DEFAULT_FRAGMENT_INTERVAL: &str = "10-20";

const DEFAULT_REALITY_FINGERPRINT: &str = "chrome";
const DEFAULT_REALITY_FLOW: &str = "xtls-rprx-vision";

/// A complete engine document for one probe.
///
/// Carries the overrides and description it was built from so results can be
/// attributed. Never mutated: [`with_local_port`](Self::with_local_port)
/// returns a new document.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedDocument {
    body: Value,
    overrides: OverrideSet,
    description: String,
    local_port: u16,
}

impl GeneratedDocument {
    /// The engine-readable JSON body.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The overrides this document was built from.
    pub fn overrides(&self) -> &OverrideSet {
        &self.overrides
    }

    /// Human-readable summary of the overrides.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The SOCKS5 port of the inbound section.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Returns a copy whose inbound listens on `port`.
    pub fn with_local_port(&self, port: u16) -> GeneratedDocument {
        let mut body = self.body.clone();
        if let Some(inbound) = body.pointer_mut("/inbounds/0") {
            inbound["port"] = json!(port);
        }
        GeneratedDocument {
            body,
            overrides: self.overrides.clone(),
            description: self.description.clone(),
            local_port: port,
        }
    }

    /// Serializes the body for the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.body)?)
    }
}

/// Builds the engine document for `variant` applied to `base`.
///
/// # Errors
///
/// Returns [`Error::Config`] when the combination cannot be expressed:
/// REALITY security on a protocol other than VLESS, or a transport override
/// naming an unknown transport.
pub fn build(base: &BaseConfig, variant: &Variant, local_port: u16) -> Result<GeneratedDocument> {
    let overrides = &variant.overrides;
    let outbound = match base {
        BaseConfig::Vless(c) => {
            let transport = effective_transport(&c.stream, overrides, TransportKind::Tcp)?;
            let mut user = json!({ "id": c.uuid.expose(), "encryption": "none" });
            if c.stream.security == SecurityMode::Reality {
                user["flow"] = json!(c.flow.as_deref().unwrap_or(DEFAULT_REALITY_FLOW));
            }
            json!({
                "tag": "proxy",
                "protocol": "vless",
                "settings": {
                    "vnext": [{ "address": c.address, "port": c.port, "users": [user] }]
                },
                "streamSettings": stream_settings(&c.stream, &c.address, overrides, transport),
            })
        }
        BaseConfig::Vmess(c) => {
            reject_reality("vmess", &c.stream)?;
            let transport = effective_transport(&c.stream, overrides, TransportKind::Ws)?;
            json!({
                "tag": "proxy",
                "protocol": "vmess",
                "settings": {
                    "vnext": [{
                        "address": c.address,
                        "port": c.port,
                        "users": [{
                            "id": c.uuid.expose(),
                            "alterId": c.alter_id,
                            "security": c.cipher,
                        }]
                    }]
                },
                "streamSettings": stream_settings(&c.stream, &c.address, overrides, transport),
            })
        }
        BaseConfig::Trojan(c) => {
            reject_reality("trojan", &c.stream)?;
            let transport = effective_transport(&c.stream, overrides, TransportKind::Tcp)?;
            json!({
                "tag": "proxy",
                "protocol": "trojan",
                "settings": {
                    "servers": [{
                        "address": c.address,
                        "port": c.port,
                        "password": c.password.expose(),
                    }]
                },
                "streamSettings": stream_settings(&c.stream, &c.address, overrides, transport),
            })
        }
        BaseConfig::Shadowsocks(c) => {
            let mut stream = Map::new();
            stream.insert("network".into(), json!("tcp"));
            if let Some(sockopt) = socket_options(overrides, None) {
                stream.insert("sockopt".into(), sockopt);
            }
            json!({
                "tag": "proxy",
                "protocol": "shadowsocks",
                "settings": {
                    "servers": [{
                        "address": c.address,
                        "port": c.port,
                        "method": c.method,
                        "password": c.password.expose(),
                    }]
                },
                "streamSettings": Value::Object(stream),
            })
        }
    };

    let body = json!({
        "log": { "loglevel": "warning" },
        "inbounds": [{
            "tag": "socks-in",
            "port": local_port,
            "listen": "127.0.0.1",
            "protocol": "socks",
            "settings": { "auth": "noauth", "udp": true },
        }],
        "outbounds": [outbound],
    });

    Ok(GeneratedDocument {
        body,
        overrides: variant.overrides.clone(),
        description: variant.description.clone(),
        local_port,
    })
}

fn reject_reality(protocol: &str, stream: &StreamParams) -> Result<()> {
    if stream.security == SecurityMode::Reality {
        return Err(Error::Config(format!(
            "reality security is not supported for {}",
            protocol
        )));
    }
    Ok(())
}

fn effective_transport(
    stream: &StreamParams,
    overrides: &OverrideSet,
    default: TransportKind,
) -> Result<TransportKind> {
    match overrides.text(ParamKey::Transport) {
        Some(name) => name.parse(),
        None => Ok(stream.transport.unwrap_or(default)),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn stream_settings(
    stream: &StreamParams,
    address: &str,
    overrides: &OverrideSet,
    transport: TransportKind,
) -> Value {
    let mut settings = Map::new();
    settings.insert("network".into(), json!(transport.as_str()));

    let path = non_empty(&stream.path);
    let host = non_empty(&stream.host);
    match transport {
        TransportKind::Tcp => {}
        TransportKind::Ws => {
            let mut headers = Map::new();
            if let Some(host) = host {
                headers.insert("Host".into(), json!(host));
            }
            settings.insert(
                "wsSettings".into(),
                json!({ "path": path.unwrap_or("/"), "headers": headers }),
            );
        }
        TransportKind::Grpc => {
            settings.insert(
                "grpcSettings".into(),
                json!({ "serviceName": path.unwrap_or("") }),
            );
        }
        TransportKind::H2 => {
            let mut h2 = json!({ "path": path.unwrap_or("/") });
            if let Some(host) = host {
                h2["host"] = json!([host]);
            }
            settings.insert("httpSettings".into(), h2);
        }
        TransportKind::Xhttp => {
            let mut xhttp = json!({ "path": path.unwrap_or("/") });
            if let Some(host) = host {
                xhttp["host"] = json!(host);
            }
            if let Some(mode) = overrides.text(ParamKey::XhttpMode) {
                xhttp["mode"] = json!(mode);
            }
            settings.insert("xhttpSettings".into(), xhttp);
        }
    }

    match stream.security {
        SecurityMode::Reality => {
            let fingerprint = overrides
                .text(ParamKey::Fingerprint)
                .or(non_empty(&stream.fingerprint))
                .unwrap_or(DEFAULT_REALITY_FINGERPRINT);
            settings.insert("security".into(), json!("reality"));
            settings.insert(
                "realitySettings".into(),
                json!({
                    "serverName": stream.sni.as_deref().unwrap_or(""),
                    "fingerprint": fingerprint,
                    "publicKey": stream.public_key.as_deref().unwrap_or(""),
                    "shortId": stream.short_id.as_deref().unwrap_or(""),
                }),
            );
        }
        SecurityMode::Tls => {
            settings.insert("security".into(), json!("tls"));
            settings.insert("tlsSettings".into(), tls_settings(stream, address, overrides));
        }
        SecurityMode::None => {
            settings.insert("security".into(), json!("none"));
        }
    }

    if let Some(sockopt) = socket_options(overrides, Some(stream)) {
        settings.insert("sockopt".into(), sockopt);
    }

    Value::Object(settings)
}

fn tls_settings(stream: &StreamParams, address: &str, overrides: &OverrideSet) -> Value {
    let mut tls = Map::new();
    tls.insert(
        "serverName".into(),
        json!(stream.sni.as_deref().unwrap_or(address)),
    );

    let fingerprint = overrides
        .text(ParamKey::Fingerprint)
        .or(non_empty(&stream.fingerprint));
    if let Some(fingerprint) = fingerprint {
        tls.insert("fingerprint".into(), json!(fingerprint));
    }

    // An override replaces the comma-joined list from the base entirely.
    let alpn: Vec<&str> = match overrides.protocols(ParamKey::Alpn) {
        Some(list) => list.to_vec(),
        None => stream
            .alpn
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect(),
    };
    if !alpn.is_empty() {
        tls.insert("alpn".into(), json!(alpn));
    }

    if overrides.flag(ParamKey::EchEnabled) == Some(true) {
        tls.insert(
            "ech".into(),
            json!({
                "enabled": true,
                "dnsQuery": overrides.flag(ParamKey::EchDns).unwrap_or(false),
            }),
        );
    }

    if stream.allow_insecure {
        tls.insert("allowInsecure".into(), json!(true));
    }

    Value::Object(tls)
}

fn socket_options(overrides: &OverrideSet, stream: Option<&StreamParams>) -> Option<Value> {
    let mut sockopt = Map::new();

    let length = overrides
        .text(ParamKey::FragmentLength)
        .or_else(|| stream.and_then(|s| non_empty(&s.fragment_length)));
    let interval = overrides
        .text(ParamKey::FragmentInterval)
        .or_else(|| stream.and_then(|s| non_empty(&s.fragment_interval)));
    let packets = overrides
        .text(ParamKey::FragmentPackets)
        .or_else(|| stream.and_then(|s| non_empty(&s.fragment_packets)));

    if length.is_some() || interval.is_some() || packets.is_some() {
        sockopt.insert(
            "fragment".into(),
            json!({
                "packets": packets.unwrap_or(DEFAULT_FRAGMENT_PACKETS),
                "length": length.unwrap_or(DEFAULT_FRAGMENT_LENGTH),
                "interval": interval.unwrap_or(DEFAULT_FRAGMENT_INTERVAL),
            }),
        );
    }

    if let Some(v) = overrides.flag(ParamKey::TcpNoDelay) {
        sockopt.insert("tcpNoDelay".into(), json!(v));
    }
    if let Some(v) = overrides.flag(ParamKey::TcpFastOpen) {
        sockopt.insert("tcpFastOpen".into(), json!(v));
    }
    if let Some(v) = overrides.flag(ParamKey::Mptcp) {
        sockopt.insert("tcpMptcp".into(), json!(v));
    }
    if let Some(v) = overrides.number(ParamKey::TcpKeepAlive) {
        sockopt.insert("tcpKeepAliveInterval".into(), json!(v));
    }
    if let Some(v) = overrides.text(ParamKey::DomainStrategy) {
        sockopt.insert("domainStrategy".into(), json!(v));
    }

    if sockopt.is_empty() {
        None
    } else {
        Some(Value::Object(sockopt))
    }
}
