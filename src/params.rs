//! Parameter space and override generation.
//!
//! This module enumerates the tunable dimensions of an obfuscated tunnel
//! connection and produces the [`OverrideSet`]s each search phase probes.
//! Everything here is pure: no I/O, no randomness, deterministic ordering.
//!
//! # Dimensions
//!
//! Each [`ParamKey`] has a closed, ordered value domain. Keys are requested in
//! user-facing [`ParamGroup`]s, which expand to one or more keys:
//!
//! | Group | Keys |
//! |-------|------|
//! | `fragment_length` | `fragment_length` |
//! | `fragment_interval` | `fragment_interval` |
//! | `fragment_packets` | `fragment_packets` |
//! | `fragment` | all three fragment keys |
//! | `fingerprint` | `fingerprint` |
//! | `alpn` | `alpn` |
//! | `ech` | `ech_enabled`, `ech_dns` |
//! | `socket_options` | `tcp_no_delay`, `tcp_fast_open`, `mptcp`, `tcp_keep_alive`, `domain_strategy` |
//! | `transport` | `transport`, `xhttp_mode` |
//!
//! # Generators
//!
//! ```text
//!   baseline()          ──▶ [ {} ]
//!   sweep(groups)       ──▶ [ {k=v} for every key, for every value ]
//!   combine(winners, n) ──▶ product of each group's top-n winners, merged
//!   full_grid(groups)   ──▶ product of every value of every key
//! ```
//!
//! Emission order follows group order, then key declaration order, then value
//! declaration order.
//!
//! # Example
//!
//! ```rust
//! use obfs_scout::params::{self, ParamGroup};
//!
//! let variants = params::sweep(&[ParamGroup::Fingerprint]);
//! assert_eq!(variants.len(), 8);
//! assert!(variants.iter().all(|v| v.overrides.len() == 1));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Description attached to the empty override set.
pub const BASELINE_DESCRIPTION: &str = "baseline (no changes)";

/// How many winners per group the smart search combines by default.
pub const DEFAULT_TOP_N: usize = 3;

/// A single tunable dimension.
///
/// The declaration order is the canonical key order used for iteration,
/// descriptions and the ordering inside an [`OverrideSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    /// Fragment byte-length range.
    FragmentLength,
    /// Delay range between fragments in milliseconds.
    FragmentInterval,
    /// Which packets get fragmented.
    FragmentPackets,
    /// uTLS client fingerprint.
    Fingerprint,
    /// ALPN protocol list.
    Alpn,
    /// Encrypted ClientHello toggle.
    EchEnabled,
    /// Fetch the ECH config over DNS.
    EchDns,
    /// TCP_NODELAY.
    TcpNoDelay,
    /// TCP Fast Open.
    TcpFastOpen,
    /// Multipath TCP.
    Mptcp,
    /// TCP keep-alive interval in seconds.
    TcpKeepAlive,
    /// Domain resolution strategy of the outbound socket.
    DomainStrategy,
    /// Transport kind.
    Transport,
    /// xhttp upload mode.
    XhttpMode,
}

impl ParamKey {
    /// All keys in declaration order.
    pub const ALL: [ParamKey; 14] = [
        ParamKey::FragmentLength,
        ParamKey::FragmentInterval,
        ParamKey::FragmentPackets,
        ParamKey::Fingerprint,
        ParamKey::Alpn,
        ParamKey::EchEnabled,
        ParamKey::EchDns,
        ParamKey::TcpNoDelay,
        ParamKey::TcpFastOpen,
        ParamKey::Mptcp,
        ParamKey::TcpKeepAlive,
        ParamKey::DomainStrategy,
        ParamKey::Transport,
        ParamKey::XhttpMode,
    ];

    /// Returns the snake_case name of this key.
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKey::FragmentLength => "fragment_length",
            ParamKey::FragmentInterval => "fragment_interval",
            ParamKey::FragmentPackets => "fragment_packets",
            ParamKey::Fingerprint => "fingerprint",
            ParamKey::Alpn => "alpn",
            ParamKey::EchEnabled => "ech_enabled",
            ParamKey::EchDns => "ech_dns",
            ParamKey::TcpNoDelay => "tcp_no_delay",
            ParamKey::TcpFastOpen => "tcp_fast_open",
            ParamKey::Mptcp => "mptcp",
            ParamKey::TcpKeepAlive => "tcp_keep_alive",
            ParamKey::DomainStrategy => "domain_strategy",
            ParamKey::Transport => "transport",
            ParamKey::XhttpMode => "xhttp_mode",
        }
    }

    /// Returns the candidate values of this key in declaration order.
    pub fn domain(self) -> Vec<ParamValue> {
        const BOOLS: [bool; 2] = [true, false];
        match self {
            ParamKey::FragmentLength => texts(&[
                "1-1", "10-20", "50-100", "100-200", "200-400", "517-517",
            ]),
            ParamKey::FragmentInterval => texts(&["1-1", "2-5", "5-10", "10-20", "20-50"]),
            ParamKey::FragmentPackets => texts(&["tlshello", "1-2", "1-3", "1-5"]),
            ParamKey::Fingerprint => texts(&[
                "chrome", "firefox", "safari", "edge", "qq", "random", "ios", "android",
            ]),
            ParamKey::Alpn => vec![
                ParamValue::Protocols(&["h2"]),
                ParamValue::Protocols(&["http/1.1"]),
                ParamValue::Protocols(&["h2", "http/1.1"]),
            ],
            ParamKey::EchEnabled
            | ParamKey::EchDns
            | ParamKey::TcpNoDelay
            | ParamKey::TcpFastOpen
            | ParamKey::Mptcp => BOOLS.iter().map(|b| ParamValue::Flag(*b)).collect(),
            ParamKey::TcpKeepAlive => [0, 15, 30, 60]
                .iter()
                .map(|n| ParamValue::Number(*n))
                .collect(),
            ParamKey::DomainStrategy => texts(&["AsIs", "UseIP", "UseIPv4"]),
            ParamKey::Transport => texts(&["ws", "xhttp", "tcp", "grpc", "h2"]),
            ParamKey::XhttpMode => texts(&["auto", "packet-up", "stream-up"]),
        }
    }

    /// Number of candidate values of this key.
    pub fn cardinality(self) -> usize {
        self.domain().len()
    }
}

fn texts(values: &[&'static str]) -> Vec<ParamValue> {
    values.iter().map(|v| ParamValue::Text(*v)).collect()
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate value for a [`ParamKey`].
///
/// Serializes to the plain JSON value the engine expects (string, boolean,
/// number or string list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A string value such as `"10-20"` or `"chrome"`.
    Text(&'static str),
    /// A boolean toggle.
    Flag(bool),
    /// An integer value.
    Number(u32),
    /// A list of protocol identifiers.
    Protocols(&'static [&'static str]),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Flag(b) => write!(f, "{}", b),
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Protocols(list) => write!(f, "[{}]", list.join(", ")),
        }
    }
}

/// A user-facing group of dimensions that is searched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamGroup {
    /// `fragment_length` only.
    FragmentLength,
    /// `fragment_interval` only.
    FragmentInterval,
    /// `fragment_packets` only.
    FragmentPackets,
    /// All three fragment keys.
    Fragment,
    /// TLS fingerprint.
    Fingerprint,
    /// ALPN list.
    Alpn,
    /// Encrypted ClientHello.
    Ech,
    /// Raw socket tuning.
    SocketOptions,
    /// Transport kind and xhttp mode.
    Transport,
}

impl ParamGroup {
    /// All groups in declaration order.
    pub const ALL: [ParamGroup; 9] = [
        ParamGroup::FragmentLength,
        ParamGroup::FragmentInterval,
        ParamGroup::FragmentPackets,
        ParamGroup::Fragment,
        ParamGroup::Fingerprint,
        ParamGroup::Alpn,
        ParamGroup::Ech,
        ParamGroup::SocketOptions,
        ParamGroup::Transport,
    ];

    /// Returns the keys this group expands to, in declaration order.
    pub fn keys(self) -> &'static [ParamKey] {
        match self {
            ParamGroup::FragmentLength => &[ParamKey::FragmentLength],
            ParamGroup::FragmentInterval => &[ParamKey::FragmentInterval],
            ParamGroup::FragmentPackets => &[ParamKey::FragmentPackets],
            ParamGroup::Fragment => &[
                ParamKey::FragmentLength,
                ParamKey::FragmentInterval,
                ParamKey::FragmentPackets,
            ],
            ParamGroup::Fingerprint => &[ParamKey::Fingerprint],
            ParamGroup::Alpn => &[ParamKey::Alpn],
            ParamGroup::Ech => &[ParamKey::EchEnabled, ParamKey::EchDns],
            ParamGroup::SocketOptions => &[
                ParamKey::TcpNoDelay,
                ParamKey::TcpFastOpen,
                ParamKey::Mptcp,
                ParamKey::TcpKeepAlive,
                ParamKey::DomainStrategy,
            ],
            ParamGroup::Transport => &[ParamKey::Transport, ParamKey::XhttpMode],
        }
    }

    /// Returns the snake_case name of this group.
    pub fn as_str(self) -> &'static str {
        match self {
            ParamGroup::FragmentLength => "fragment_length",
            ParamGroup::FragmentInterval => "fragment_interval",
            ParamGroup::FragmentPackets => "fragment_packets",
            ParamGroup::Fragment => "fragment",
            ParamGroup::Fingerprint => "fingerprint",
            ParamGroup::Alpn => "alpn",
            ParamGroup::Ech => "ech",
            ParamGroup::SocketOptions => "socket_options",
            ParamGroup::Transport => "transport",
        }
    }
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        ParamGroup::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown parameter group: {}", s)))
    }
}

/// Parses a comma-separated list of group names.
///
/// Empty entries are skipped; unknown names are an error.
///
/// # Example
///
/// ```rust
/// use obfs_scout::params::{parse_groups, ParamGroup};
///
/// let groups = parse_groups("fragment, alpn").unwrap();
/// assert_eq!(groups, vec![ParamGroup::Fragment, ParamGroup::Alpn]);
/// assert!(parse_groups("fragment,bogus").is_err());
/// ```
pub fn parse_groups(list: &str) -> Result<Vec<ParamGroup>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Drops repeated groups and groups whose keys another requested group
/// already covers.
///
/// ```rust
/// use obfs_scout::params::{distinct_groups, ParamGroup};
///
/// let groups = distinct_groups(&[ParamGroup::FragmentLength, ParamGroup::Fragment]);
/// assert_eq!(groups, vec![ParamGroup::Fragment]);
/// ```
pub fn distinct_groups(groups: &[ParamGroup]) -> Vec<ParamGroup> {
    let mut kept: Vec<ParamGroup> = Vec::with_capacity(groups.len());
    for &group in groups {
        let covered = groups.iter().any(|&other| {
            other != group && group.keys().iter().all(|k| other.keys().contains(k))
        });
        if !covered && !kept.contains(&group) {
            kept.push(group);
        }
    }
    kept
}

/// The groups searched by quick mode.
pub fn quick_groups() -> &'static [ParamGroup] {
    &[ParamGroup::Fragment, ParamGroup::Fingerprint, ParamGroup::Alpn]
}

/// A sparse set of parameter choices layered onto a base configuration.
///
/// An empty set is the baseline. Keys are kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OverrideSet(BTreeMap<ParamKey, ParamValue>);

impl OverrideSet {
    /// Creates an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding exactly one choice.
    pub fn single(key: ParamKey, value: ParamValue) -> Self {
        let mut set = Self::new();
        set.insert(key, value);
        set
    }

    /// Sets `key` to `value`, replacing any previous choice.
    pub fn insert(&mut self, key: ParamKey, value: ParamValue) {
        self.0.insert(key, value);
    }

    /// Returns the choice for `key`, if any.
    pub fn get(&self, key: ParamKey) -> Option<&ParamValue> {
        self.0.get(&key)
    }

    /// Returns `true` if `key` is explicitly set.
    pub fn contains(&self, key: ParamKey) -> bool {
        self.0.contains_key(&key)
    }

    /// Returns `true` if any of `keys` is explicitly set.
    pub fn touches(&self, keys: &[ParamKey]) -> bool {
        keys.iter().any(|k| self.contains(*k))
    }

    /// String value of `key`, if set to a [`ParamValue::Text`].
    pub fn text(&self, key: ParamKey) -> Option<&'static str> {
        match self.get(key) {
            Some(ParamValue::Text(s)) => Some(*s),
            _ => None,
        }
    }

    /// Boolean value of `key`, if set to a [`ParamValue::Flag`].
    pub fn flag(&self, key: ParamKey) -> Option<bool> {
        match self.get(key) {
            Some(ParamValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    /// Integer value of `key`, if set to a [`ParamValue::Number`].
    pub fn number(&self, key: ParamKey) -> Option<u32> {
        match self.get(key) {
            Some(ParamValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Protocol list of `key`, if set to a [`ParamValue::Protocols`].
    pub fn protocols(&self, key: ParamKey) -> Option<&'static [&'static str]> {
        match self.get(key) {
            Some(ParamValue::Protocols(list)) => Some(*list),
            _ => None,
        }
    }

    /// Copies every choice of `other` into this set; `other` wins on conflicts.
    pub fn merge(&mut self, other: &OverrideSet) {
        for (k, v) in other.iter() {
            self.insert(k, *v);
        }
    }

    /// Iterates choices in key declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, &ParamValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Number of explicit choices.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the baseline set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the choices as `key=value` pairs joined by `separator`.
    pub fn describe(&self, separator: &str) -> String {
        self.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// An override set together with the description used to attribute results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// The parameter choices.
    pub overrides: OverrideSet,
    /// Human-readable summary of the choices.
    pub description: String,
}

impl Variant {
    /// Creates a variant from an override set and its description.
    pub fn new(overrides: OverrideSet, description: impl Into<String>) -> Self {
        Self {
            overrides,
            description: description.into(),
        }
    }
}

/// A successful sweep outcome that may be combined with other groups.
#[derive(Debug, Clone, PartialEq)]
pub struct Winner {
    /// The winning choices.
    pub overrides: OverrideSet,
    /// Measured latency in milliseconds.
    pub latency_ms: u64,
}

/// Per-group winners, each list ordered by ascending latency.
///
/// Groups keep their insertion order. Groups without any winner are never
/// stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionWinners {
    groups: Vec<(ParamGroup, Vec<Winner>)>,
}

impl DimensionWinners {
    /// Creates an empty winner table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the winners of `group`, sorting them by ascending latency.
    ///
    /// An empty list is ignored; a repeated group replaces the earlier entry.
    pub fn insert(&mut self, group: ParamGroup, mut winners: Vec<Winner>) {
        if winners.is_empty() {
            return;
        }
        winners.sort_by_key(|w| w.latency_ms);
        if let Some(entry) = self.groups.iter_mut().find(|(g, _)| *g == group) {
            entry.1 = winners;
        } else {
            self.groups.push((group, winners));
        }
    }

    /// Returns the winners of `group`, best first.
    pub fn get(&self, group: ParamGroup) -> Option<&[Winner]> {
        self.groups
            .iter()
            .find(|(g, _)| *g == group)
            .map(|(_, w)| w.as_slice())
    }

    /// Iterates groups in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamGroup, &[Winner])> {
        self.groups.iter().map(|(g, w)| (*g, w.as_slice()))
    }

    /// Number of groups that have at least one winner.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` if no group produced a winner.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Expands groups to their keys, keeping first-seen order and dropping repeats.
pub fn expand_keys(groups: &[ParamGroup]) -> Vec<ParamKey> {
    let mut keys = Vec::new();
    for group in groups {
        for key in group.keys() {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
    }
    keys
}

/// The single baseline variant: no overrides.
pub fn baseline() -> Variant {
    Variant::new(OverrideSet::new(), BASELINE_DESCRIPTION)
}

/// One singleton variant for every value of every key of `groups`.
///
/// The baseline is not included. The result has
/// `Σ |domain(key)|` entries over the requested keys.
pub fn sweep(groups: &[ParamGroup]) -> Vec<Variant> {
    let mut variants = Vec::new();
    for key in expand_keys(groups) {
        for value in key.domain() {
            let overrides = OverrideSet::single(key, value);
            let description = overrides.describe(", ");
            variants.push(Variant::new(overrides, description));
        }
    }
    variants
}

/// Cartesian product of each group's `top_n` winners, merged per tuple.
///
/// Returns nothing when fewer than two groups have winners: a single group
/// has already been covered by its sweep. Tuples whose members set the same
/// key are skipped, so every combination sets one key per member.
pub fn combine(winners: &DimensionWinners, top_n: usize) -> Vec<Variant> {
    if winners.len() < 2 || top_n == 0 {
        return Vec::new();
    }

    let tops: Vec<Vec<&OverrideSet>> = winners
        .iter()
        .map(|(_, list)| list.iter().take(top_n).map(|w| &w.overrides).collect())
        .collect();

    cartesian(&tops)
        .into_iter()
        .filter_map(|combo| {
            let mut merged = OverrideSet::new();
            let mut wanted = 0;
            for overrides in combo {
                merged.merge(overrides);
                wanted += overrides.len();
            }
            if merged.len() < wanted {
                return None;
            }
            let description = merged.describe(" + ");
            Some(Variant::new(merged, description))
        })
        .collect()
}

/// Every combination of every value of every key of `groups`.
///
/// With no keys the product is a single empty set. The size is
/// [`grid_size`]; bounding it is the caller's job.
pub fn full_grid(groups: &[ParamGroup]) -> Vec<Variant> {
    let domains: Vec<Vec<(ParamKey, ParamValue)>> = expand_keys(groups)
        .into_iter()
        .map(|key| key.domain().into_iter().map(|v| (key, v)).collect())
        .collect();

    cartesian(&domains)
        .into_iter()
        .map(|combo| {
            let mut overrides = OverrideSet::new();
            for (key, value) in combo {
                overrides.insert(key, value);
            }
            let description = if overrides.is_empty() {
                BASELINE_DESCRIPTION.to_string()
            } else {
                overrides.describe(", ")
            };
            Variant::new(overrides, description)
        })
        .collect()
}

/// Number of variants [`full_grid`] would produce, saturating at `usize::MAX`.
pub fn grid_size(groups: &[ParamGroup]) -> usize {
    expand_keys(groups)
        .into_iter()
        .fold(1usize, |acc, key| acc.saturating_mul(key.cardinality()))
}

fn cartesian<T: Clone>(lists: &[Vec<T>]) -> Vec<Vec<T>> {
    let mut product: Vec<Vec<T>> = vec![Vec::new()];
    for list in lists {
        let mut next = Vec::with_capacity(product.len() * list.len());
        for prefix in &product {
            for item in list {
                let mut row = prefix.clone();
                row.push(item.clone());
                next.push(row);
            }
        }
        product = next;
    }
    product
}
