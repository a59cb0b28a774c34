//! Search progress events.
//!
//! The search core never renders anything. It writes [`SearchEvent`]s into an
//! [`EventSink`], and whoever holds the receiving end (the CLI, a test, a UI)
//! decides what to do with them. Events are purely observational: a closed
//! or absent receiver never changes how a search runs.

use std::fmt;
use tokio::sync::mpsc;

use crate::probe::ProbeResult;

/// One observable step of a search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// A phase is about to start.
    PhaseStarted {
        /// Phase name, e.g. `"Baseline Test"`.
        name: String,
        /// 1-based position of the phase.
        index: usize,
        /// Number of phases in this mode.
        total: usize,
    },
    /// A probe finished.
    ProbeFinished {
        /// The probe's outcome.
        result: ProbeResult,
        /// Probes finished so far in this batch, including this one.
        completed: usize,
        /// Probes in this batch.
        total: usize,
    },
}

impl fmt::Display for SearchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchEvent::PhaseStarted { name, index, total } => {
                write!(f, "Phase {}/{}: {}", index, total, name)
            }
            SearchEvent::ProbeFinished {
                result,
                completed,
                total,
            } => {
                let pct = completed * 100 / (*total).max(1);
                write!(
                    f,
                    "{}/{} ({}%) {}: ",
                    completed,
                    total,
                    pct,
                    result.description()
                )?;
                match result.latency() {
                    Some(ms) if result.throughput_mbps() >= 0.0 => {
                        write!(f, "OK {}ms, {:.2} Mbps", ms, result.throughput_mbps())
                    }
                    Some(ms) => write!(f, "OK {}ms", ms),
                    None => write!(f, "FAIL {}", result.error()),
                }
            }
        }
    }
}

/// Sending half of the event channel.
///
/// A disconnected sink drops events silently.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SearchEvent>>,
}

impl EventSink {
    /// Creates a connected sink and its receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Sends an event if anyone is listening.
    pub fn emit(&self, event: SearchEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(SearchEvent::PhaseStarted {
            name: "Baseline Test".into(),
            index: 1,
            total: 3,
        });
        match rx.try_recv().unwrap() {
            SearchEvent::PhaseStarted { name, index, total } => {
                assert_eq!(name, "Baseline Test");
                assert_eq!((index, total), (1, 3));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_progress_lines() {
        use crate::params::OverrideSet;
        use crate::probe::ProbeFailure;

        let ok = SearchEvent::ProbeFinished {
            result: ProbeResult::succeeded(OverrideSet::new(), "alpn=h2", 142, None),
            completed: 3,
            total: 12,
        };
        assert_eq!(ok.to_string(), "3/12 (25%) alpn=h2: OK 142ms");

        let fast = SearchEvent::ProbeFinished {
            result: ProbeResult::succeeded(OverrideSet::new(), "alpn=h2", 90, Some(12.5)),
            completed: 12,
            total: 12,
        };
        assert_eq!(fast.to_string(), "12/12 (100%) alpn=h2: OK 90ms, 12.50 Mbps");

        let blocked = SearchEvent::ProbeFinished {
            result: ProbeResult::failed(OverrideSet::new(), "fingerprint=ios", ProbeFailure::Timeout),
            completed: 1,
            total: 4,
        };
        assert_eq!(blocked.to_string(), "1/4 (25%) fingerprint=ios: FAIL timeout");

        let phase = SearchEvent::PhaseStarted {
            name: "Combining Winners".into(),
            index: 3,
            total: 3,
        };
        assert_eq!(phase.to_string(), "Phase 3/3: Combining Winners");
    }

    #[test]
    fn test_closed_and_disabled_sinks_are_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(SearchEvent::PhaseStarted {
            name: "x".into(),
            index: 1,
            total: 1,
        });
        EventSink::disabled().emit(SearchEvent::PhaseStarted {
            name: "y".into(),
            index: 1,
            total: 1,
        });
    }
}
