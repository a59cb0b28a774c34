//! Multi-phase search orchestration.
//!
//! The orchestrator sequences probe batches, feeding each phase's outcome
//! into the next. Phases never overlap: a batch drains completely before the
//! next one is generated.
//!
//! # Modes
//!
//! ```text
//!   Smart / Quick                          Full
//!   ─────────────                          ────
//!   1. Baseline Test         (1 probe)     1. Baseline Test    (1 probe)
//!   2. Individual Parameter Sweep          2. Full Grid Search
//!        one probe per (key, value)             every combination of every
//!   ── winner extraction (no probing) ──        value of every key
//!   3. Combining Winners
//!        top-N of each group, crossed
//!        (skipped with < 2 groups)
//! ```
//!
//! Quick mode is smart mode over a fixed reduced set of groups
//! ([`quick_groups`]); caller-supplied groups are ignored.
//!
//! # Results
//!
//! A [`SearchSession`] keeps every result in phase order, and within a phase
//! in completion order. Ranking is computed on demand by
//! [`SearchSession::ranked`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use obfs_scout::params::ParamGroup;
//! use obfs_scout::ports::PortAllocator;
//! use obfs_scout::probe::{EngineCommand, ProbeRunner, RunnerOptions};
//! use obfs_scout::search::{SearchMode, SearchOrchestrator, SearchSettings};
//! use obfs_scout::BaseConfig;
//!
//! #[tokio::main]
//! async fn main() -> obfs_scout::Result<()> {
//!     let base = BaseConfig::from_file("endpoint.toml".as_ref())?;
//!     let runner = ProbeRunner::new(
//!         EngineCommand::default(),
//!         Arc::new(PortAllocator::default()),
//!         RunnerOptions::default(),
//!     );
//!     let search = SearchOrchestrator::new(Arc::new(runner), SearchSettings::default());
//!     let session = search
//!         .run(&base, SearchMode::Smart, &[ParamGroup::Fingerprint, ParamGroup::Alpn])
//!         .await?;
//!     if let Some(best) = session.best() {
//!         println!("{} at {}ms", best.description(), best.latency_ms());
//!     }
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::base::BaseConfig;
use crate::batch::{run_batch, BatchOptions};
use crate::builder::{build, GeneratedDocument, DEFAULT_LOCAL_PORT};
use crate::config::LogLevel;
use crate::error::{Error, Result};
use crate::events::{EventSink, SearchEvent};
use crate::params::{
    self, quick_groups, DimensionWinners, ParamGroup, Variant, Winner, DEFAULT_TOP_N,
};
use crate::plog_fmt;
use crate::probe::{Probe, ProbeResult};

/// Name of the baseline phase.
pub const PHASE_BASELINE: &str = "Baseline Test";
/// Name of the per-key sweep phase.
pub const PHASE_SWEEP: &str = "Individual Parameter Sweep";
/// Name of the winner combination phase.
pub const PHASE_COMBINE: &str = "Combining Winners";
/// Name of the exhaustive phase.
pub const PHASE_FULL_GRID: &str = "Full Grid Search";

/// Default upper bound on full-grid size.
pub const DEFAULT_MAX_GRID_SIZE: usize = 10_000;

/// Search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Baseline, sweep, then combine the winners.
    #[default]
    Smart,
    /// Baseline, then every combination.
    Full,
    /// Smart mode over the quick groups.
    Quick,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Smart => write!(f, "smart"),
            SearchMode::Full => write!(f, "full"),
            SearchMode::Quick => write!(f, "quick"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smart" => Ok(SearchMode::Smart),
            "full" => Ok(SearchMode::Full),
            "quick" => Ok(SearchMode::Quick),
            _ => Err(Error::Config(format!("unknown search mode: {}", s))),
        }
    }
}

/// Tunables of a search run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    /// Probes in flight per batch.
    pub concurrency: usize,
    /// Per-probe timeout.
    pub timeout: Duration,
    /// Measure throughput on successful probes.
    pub measure_throughput: bool,
    /// Winners per group carried into the combination phase.
    pub top_n: usize,
    /// Refuse full-grid searches larger than this.
    pub max_grid_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout: Duration::from_secs(15),
            measure_throughput: false,
            top_n: DEFAULT_TOP_N,
            max_grid_size: DEFAULT_MAX_GRID_SIZE,
        }
    }
}

impl SearchSettings {
    fn batch(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.concurrency,
            timeout: self.timeout,
            measure_throughput: self.measure_throughput,
        }
    }
}

/// Runs searches against one probe implementation.
pub struct SearchOrchestrator<P: Probe> {
    probe: Arc<P>,
    settings: SearchSettings,
    events: EventSink,
}

impl<P: Probe> SearchOrchestrator<P> {
    /// Creates an orchestrator that emits no events.
    pub fn new(probe: Arc<P>, settings: SearchSettings) -> Self {
        Self {
            probe,
            settings,
            events: EventSink::disabled(),
        }
    }

    /// Sends progress events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// The settings in use.
    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Runs a search for `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base` cannot be turned into an engine
    /// document, and [`Error::GridTooLarge`] if a full search exceeds
    /// `max_grid_size`. Both are detected before any probe runs. Probe
    /// failures are never errors.
    pub async fn run(
        &self,
        base: &BaseConfig,
        mode: SearchMode,
        groups: &[ParamGroup],
    ) -> Result<SearchSession> {
        let groups: Vec<ParamGroup> = match mode {
            SearchMode::Quick => quick_groups().to_vec(),
            SearchMode::Smart | SearchMode::Full => groups.to_vec(),
        };

        let baseline = build(base, &params::baseline(), DEFAULT_LOCAL_PORT)?;

        if mode == SearchMode::Full {
            let size = params::grid_size(&groups);
            if size > self.settings.max_grid_size {
                return Err(Error::GridTooLarge {
                    size,
                    limit: self.settings.max_grid_size,
                });
            }
        }

        plog_fmt!(
            LogLevel::Notice,
            "Starting {} search of {} {}:{} over [{}]",
            mode,
            base.protocol_name(),
            base.address(),
            base.port(),
            groups
                .iter()
                .map(|g| g.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );

        let mut results = Vec::new();
        match mode {
            SearchMode::Full => {
                self.phase(PHASE_BASELINE, 1, 2, vec![baseline], &mut results)
                    .await;

                let grid: Vec<Variant> = params::full_grid(&groups)
                    .into_iter()
                    .filter(|v| !v.overrides.is_empty())
                    .collect();
                let documents = build_all(base, &grid)?;
                self.phase(PHASE_FULL_GRID, 2, 2, documents, &mut results)
                    .await;
            }
            SearchMode::Smart | SearchMode::Quick => {
                self.phase(PHASE_BASELINE, 1, 3, vec![baseline], &mut results)
                    .await;

                let documents = build_all(base, &params::sweep(&groups))?;
                let sweep = self.phase(PHASE_SWEEP, 2, 3, documents, &mut results).await;

                let winners = extract_winners(&groups, &sweep);
                let combos = params::combine(&winners, self.settings.top_n);
                if combos.is_empty() {
                    self.events.emit(SearchEvent::PhaseStarted {
                        name: PHASE_COMBINE.to_string(),
                        index: 3,
                        total: 3,
                    });
                    plog_fmt!(
                        LogLevel::Debug,
                        "Phase 3/3: {} skipped, {} group(s) produced winners",
                        PHASE_COMBINE,
                        winners.len(),
                    );
                } else {
                    let documents = build_all(base, &combos)?;
                    self.phase(PHASE_COMBINE, 3, 3, documents, &mut results)
                        .await;
                }
            }
        }

        let session = SearchSession::new(mode, results);
        let summary = session.summary();
        plog_fmt!(
            LogLevel::Notice,
            "Search finished: {} tested, {} working, {} blocked",
            summary.tested,
            summary.working,
            summary.blocked,
        );
        Ok(session)
    }

    /// Announces a phase, runs its batch, appends to `all` and returns the
    /// phase's own results.
    async fn phase(
        &self,
        name: &str,
        index: usize,
        total: usize,
        documents: Vec<GeneratedDocument>,
        all: &mut Vec<ProbeResult>,
    ) -> Vec<ProbeResult> {
        self.events.emit(SearchEvent::PhaseStarted {
            name: name.to_string(),
            index,
            total,
        });
        plog_fmt!(
            LogLevel::Debug,
            "Phase {}/{}: {} ({} probes)",
            index,
            total,
            name,
            documents.len(),
        );

        let results = run_batch(&self.probe, documents, self.settings.batch(), &self.events).await;
        all.extend(results.iter().cloned());
        results
    }
}

fn build_all(base: &BaseConfig, variants: &[Variant]) -> Result<Vec<GeneratedDocument>> {
    variants
        .iter()
        .map(|v| build(base, v, DEFAULT_LOCAL_PORT))
        .collect()
}

/// Collects, per group, the successful sweep results touching its keys.
///
/// Each list is sorted by ascending latency; groups without any success are
/// left out, and so are groups another requested group already covers
/// ([`params::distinct_groups`]).
pub fn extract_winners(groups: &[ParamGroup], sweep: &[ProbeResult]) -> DimensionWinners {
    let mut winners = DimensionWinners::new();
    for group in params::distinct_groups(groups) {
        let list: Vec<Winner> = sweep
            .iter()
            .filter(|r| r.overrides().touches(group.keys()))
            .filter_map(|r| {
                r.latency().map(|latency_ms| Winner {
                    overrides: r.overrides().clone(),
                    latency_ms,
                })
            })
            .collect();
        winners.insert(group, list);
    }
    winners
}

/// Counts over a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Probes run.
    pub tested: usize,
    /// Probes that connected.
    pub working: usize,
    /// Probes that failed.
    pub blocked: usize,
}

/// Every result of a search run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSession {
    mode: SearchMode,
    results: Vec<ProbeResult>,
}

impl SearchSession {
    /// Wraps results gathered in phase order.
    pub fn new(mode: SearchMode, results: Vec<ProbeResult>) -> Self {
        Self { mode, results }
    }

    /// The mode that produced this session.
    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// All results in phase order.
    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    /// Successes by ascending latency, then failures in their original order.
    pub fn ranked(&self) -> Vec<&ProbeResult> {
        let mut working: Vec<&ProbeResult> = self.results.iter().filter(|r| r.success()).collect();
        working.sort_by_key(|r| r.latency_ms());
        working.extend(self.results.iter().filter(|r| !r.success()));
        working
    }

    /// The fastest working result.
    pub fn best(&self) -> Option<&ProbeResult> {
        self.ranked().into_iter().find(|r| r.success())
    }

    /// Tested, working and blocked counts.
    pub fn summary(&self) -> SessionSummary {
        let working = self.results.iter().filter(|r| r.success()).count();
        SessionSummary {
            tested: self.results.len(),
            working,
            blocked: self.results.len() - working,
        }
    }

    /// Writes every result as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] or [`Error::Io`].
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.results)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GeneratedDocument;
    use crate::params::{OverrideSet, ParamKey, ParamValue};
    use crate::probe::ProbeFailure;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Succeeds with a latency derived from the description, except for
    /// descriptions containing any of `blocked`.
    struct ScriptedProbe {
        calls: AtomicUsize,
        blocked: Vec<&'static str>,
    }

    impl ScriptedProbe {
        fn new(blocked: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                blocked,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Probe for ScriptedProbe {
        fn probe(
            &self,
            document: GeneratedDocument,
            _timeout: Duration,
            _measure_throughput: bool,
        ) -> impl Future<Output = ProbeResult> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let blocked = self
                .blocked
                .iter()
                .any(|b| document.description().contains(b));
            async move {
                if blocked {
                    ProbeResult::failed_for(&document, ProbeFailure::Timeout)
                } else {
                    let latency = 100 + document.description().len() as u64;
                    ProbeResult::succeeded(
                        document.overrides().clone(),
                        document.description(),
                        latency,
                        None,
                    )
                }
            }
        }
    }

    fn base() -> BaseConfig {
        BaseConfig::from_toml_str(
            r#"
            protocol = "vless"
            address = "edge.example.net"
            port = 443
            uuid = "u"
            "#,
        )
        .unwrap()
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            concurrency: 4,
            timeout: Duration::from_secs(1),
            ..SearchSettings::default()
        }
    }

    fn phase_names(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SearchEvent>) -> Vec<(String, usize, usize)> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SearchEvent::PhaseStarted { name, index, total } = event {
                names.push((name, index, total));
            }
        }
        names
    }

    #[tokio::test]
    async fn test_smart_two_groups_all_succeed() {
        let probe = ScriptedProbe::new(vec![]);
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings());
        let session = search
            .run(
                &base(),
                SearchMode::Smart,
                &[ParamGroup::Alpn, ParamGroup::FragmentPackets],
            )
            .await
            .unwrap();

        // 1 baseline + (3 + 4) sweep + min(3,3) * min(4,3) combinations.
        assert_eq!(session.results().len(), 1 + 7 + 9);
        assert_eq!(probe.calls(), 17);
        assert_eq!(session.results()[0].description(), params::BASELINE_DESCRIPTION);
        assert!(session.results()[8..]
            .iter()
            .all(|r| r.overrides().len() == 2 && r.description().contains(" + ")));
        assert_eq!(session.summary().working, 17);
    }

    #[tokio::test]
    async fn test_overlapping_groups_combine_once() {
        let probe = ScriptedProbe::new(vec![]);
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings());
        let session = search
            .run(
                &base(),
                SearchMode::Smart,
                &[ParamGroup::FragmentLength, ParamGroup::Fragment, ParamGroup::Alpn],
            )
            .await
            .unwrap();

        // fragment_length folds into fragment: 1 + (15 + 3) + 3 * 3.
        assert_eq!(session.results().len(), 1 + 18 + 9);
        for result in &session.results()[19..] {
            assert_eq!(result.overrides().len(), 2, "{}", result.description());
            assert!(result.overrides().contains(ParamKey::Alpn));
            assert_eq!(result.description(), result.overrides().describe(" + "));
        }
    }

    #[tokio::test]
    async fn test_smart_single_group_skips_combination() {
        let probe = ScriptedProbe::new(vec![]);
        let (sink, mut rx) = EventSink::channel();
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings()).with_events(sink);
        let session = search
            .run(&base(), SearchMode::Smart, &[ParamGroup::Fingerprint])
            .await
            .unwrap();

        assert_eq!(session.results().len(), 1 + 8);
        assert_eq!(
            phase_names(&mut rx),
            vec![
                (PHASE_BASELINE.to_string(), 1, 3),
                (PHASE_SWEEP.to_string(), 2, 3),
                (PHASE_COMBINE.to_string(), 3, 3),
            ]
        );
    }

    #[tokio::test]
    async fn test_blocked_group_drops_out_of_combination() {
        let probe = ScriptedProbe::new(vec!["alpn="]);
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings());
        let session = search
            .run(
                &base(),
                SearchMode::Smart,
                &[ParamGroup::Alpn, ParamGroup::Fingerprint],
            )
            .await
            .unwrap();

        // Only fingerprint produced winners, so nothing is combined.
        assert_eq!(session.results().len(), 1 + 3 + 8);
        assert_eq!(session.summary().blocked, 3);
    }

    #[tokio::test]
    async fn test_full_mode_runs_grid_without_empty_set() {
        let probe = ScriptedProbe::new(vec![]);
        let (sink, mut rx) = EventSink::channel();
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings()).with_events(sink);
        let session = search
            .run(&base(), SearchMode::Full, &[ParamGroup::Alpn, ParamGroup::Ech])
            .await
            .unwrap();

        assert_eq!(session.results().len(), 1 + 3 * 2 * 2);
        let baselines = session
            .results()
            .iter()
            .filter(|r| r.overrides().is_empty())
            .count();
        assert_eq!(baselines, 1);
        assert_eq!(
            phase_names(&mut rx),
            vec![
                (PHASE_BASELINE.to_string(), 1, 2),
                (PHASE_FULL_GRID.to_string(), 2, 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_mode_bounded() {
        let probe = ScriptedProbe::new(vec![]);
        let search = SearchOrchestrator::new(
            Arc::clone(&probe),
            SearchSettings {
                max_grid_size: 100,
                ..settings()
            },
        );
        let err = search
            .run(&base(), SearchMode::Full, &ParamGroup::ALL)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GridTooLarge { limit: 100, .. }));
        assert_eq!(probe.calls(), 0);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_phase_headers_left_to_event_consumers() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);

        let probe = ScriptedProbe::new(vec![]);
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings());
        search
            .run(&base(), SearchMode::Smart, &[ParamGroup::Fingerprint])
            .await
            .unwrap();
        drop(guard);

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("Search finished"), "{}", logged);
        assert!(!logged.contains("Phase "), "{}", logged);
    }

    #[tokio::test]
    async fn test_quick_mode_ignores_groups() {
        let probe = ScriptedProbe::new(vec![]);
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings());
        let session = search
            .run(&base(), SearchMode::Quick, &[ParamGroup::SocketOptions])
            .await
            .unwrap();

        let sweep = params::sweep(quick_groups()).len();
        assert_eq!(sweep, 6 + 5 + 4 + 8 + 3);
        // Three groups with winners: 3 * 3 * 3 combinations.
        assert_eq!(session.results().len(), 1 + sweep + 27);
        assert!(session
            .results()
            .iter()
            .all(|r| !r.overrides().contains(ParamKey::TcpNoDelay)));
    }

    #[tokio::test]
    async fn test_unbuildable_base_fails_before_probing() {
        let reality_trojan = BaseConfig::from_toml_str(
            r#"
            protocol = "trojan"
            address = "h"
            port = 443
            password = "p"
            security = "reality"
            "#,
        )
        .unwrap();
        let probe = ScriptedProbe::new(vec![]);
        let search = SearchOrchestrator::new(Arc::clone(&probe), settings());
        let err = search
            .run(&reality_trojan, SearchMode::Smart, &[ParamGroup::Alpn])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn test_extract_winners_filters_and_sorts() {
        let fp = |v: &'static str| OverrideSet::single(ParamKey::Fingerprint, ParamValue::Text(v));
        let sweep = vec![
            ProbeResult::succeeded(fp("chrome"), "fingerprint=chrome", 300, None),
            ProbeResult::failed(fp("firefox"), "fingerprint=firefox", ProbeFailure::Timeout),
            ProbeResult::succeeded(fp("safari"), "fingerprint=safari", 120, None),
            ProbeResult::failed(
                OverrideSet::single(ParamKey::Alpn, ParamValue::Protocols(&["h2"])),
                "alpn=[h2]",
                ProbeFailure::BadStatus(403),
            ),
        ];

        let winners = extract_winners(&[ParamGroup::Fingerprint, ParamGroup::Alpn], &sweep);
        assert_eq!(winners.len(), 1);
        let fingerprint = winners.get(ParamGroup::Fingerprint).unwrap();
        assert_eq!(fingerprint.len(), 2);
        assert_eq!(fingerprint[0].overrides, fp("safari"));
        assert_eq!(fingerprint[0].latency_ms, 120);
        assert!(winners.get(ParamGroup::Alpn).is_none());
    }

    #[test]
    fn test_ranking_and_best() {
        let session = SearchSession::new(
            SearchMode::Smart,
            vec![
                ProbeResult::failed(OverrideSet::new(), "a", ProbeFailure::Timeout),
                ProbeResult::succeeded(OverrideSet::new(), "b", 250, None),
                ProbeResult::failed(OverrideSet::new(), "c", ProbeFailure::BadStatus(500)),
                ProbeResult::succeeded(OverrideSet::new(), "d", 80, None),
                ProbeResult::succeeded(OverrideSet::new(), "e", 250, None),
            ],
        );

        let order: Vec<&str> = session.ranked().iter().map(|r| r.description()).collect();
        assert_eq!(order, vec!["d", "b", "e", "a", "c"]);
        assert_eq!(session.best().unwrap().description(), "d");
        assert_eq!(
            session.summary(),
            SessionSummary {
                tested: 5,
                working: 3,
                blocked: 2
            }
        );
        // Stored order is untouched.
        assert_eq!(session.results()[0].description(), "a");
    }

    #[test]
    fn test_best_none_when_all_blocked() {
        let session = SearchSession::new(
            SearchMode::Full,
            vec![ProbeResult::failed(OverrideSet::new(), "a", ProbeFailure::Timeout)],
        );
        assert!(session.best().is_none());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let session = SearchSession::new(
            SearchMode::Smart,
            vec![
                ProbeResult::succeeded(OverrideSet::new(), params::BASELINE_DESCRIPTION, 90, None),
                ProbeResult::failed(
                    OverrideSet::single(ParamKey::TcpNoDelay, ParamValue::Flag(true)),
                    "tcp_no_delay=true",
                    ProbeFailure::EngineExited { code: 23 },
                ),
            ],
        );
        session.write_json(&path).unwrap();

        let data: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entries = data.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["success"], true);
        assert_eq!(entries[1]["params"]["tcp_no_delay"], true);
        assert_eq!(entries[1]["latency_ms"], -1);
        assert_eq!(entries[1]["error"], "engine exited with code 23");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("QUICK".parse::<SearchMode>().unwrap(), SearchMode::Quick);
        assert!("exhaustive".parse::<SearchMode>().is_err());
        assert_eq!(SearchMode::default().to_string(), "smart");
    }
}
