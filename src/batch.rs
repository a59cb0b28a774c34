//! Bounded-concurrency probe batches.
//!
//! [`run_batch`] fans a list of documents out to a [`Probe`], keeping at most
//! `concurrency` probes in flight, and gathers one [`ProbeResult`] per
//! document in completion order.
//!
//! ```text
//!   documents ──► spawn one task each ──► Semaphore(concurrency)
//!                                               │
//!                                        probe (own task, panics caught)
//!                                               │
//!                                  ┌────────────▼────────────┐
//!                                  │ Mutex<results, count>   │
//!                                  │  push, count += 1,      │
//!                                  │  emit ProbeFinished     │
//!                                  └─────────────────────────┘
//! ```
//!
//! Appending a result, bumping the completed counter and emitting the event
//! happen under one lock, so every event carries a distinct count from
//! `1..=total`. A failed or panicking probe is an ordinary result and never
//! stops its siblings.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::builder::GeneratedDocument;
use crate::config::LogLevel;
use crate::events::{EventSink, SearchEvent};
use crate::plog_fmt;
use crate::probe::{Probe, ProbeFailure, ProbeResult};

/// How a batch runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOptions {
    /// Maximum number of probes in flight. Zero is treated as one.
    pub concurrency: usize,
    /// Per-probe timeout for the connectivity and throughput checks.
    pub timeout: Duration,
    /// Whether to measure throughput after a successful check.
    pub measure_throughput: bool,
}

#[derive(Default)]
struct Aggregate {
    results: Vec<ProbeResult>,
    completed: usize,
}

/// Probes every document and returns all results in completion order.
///
/// Always returns exactly one result per document.
pub async fn run_batch<P: Probe>(
    probe: &Arc<P>,
    documents: Vec<GeneratedDocument>,
    options: BatchOptions,
    events: &EventSink,
) -> Vec<ProbeResult> {
    let total = documents.len();
    if total == 0 {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let aggregate = Arc::new(Mutex::new(Aggregate {
        results: Vec::with_capacity(total),
        completed: 0,
    }));
    let mut tasks = JoinSet::new();

    for document in documents {
        let probe = Arc::clone(probe);
        let semaphore = Arc::clone(&semaphore);
        let aggregate = Arc::clone(&aggregate);
        let events = events.clone();

        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(permit) => {
                    let result = probe_isolated(probe, document, options).await;
                    drop(permit);
                    result
                }
                Err(_) => ProbeResult::failed_for(
                    &document,
                    ProbeFailure::Crashed("concurrency limiter closed".to_string()),
                ),
            };

            let mut aggregate = aggregate.lock().await;
            aggregate.completed += 1;
            aggregate.results.push(result.clone());
            events.emit(SearchEvent::ProbeFinished {
                result,
                completed: aggregate.completed,
                total,
            });
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            plog_fmt!(LogLevel::Warn, "Batch task failed: {}", e);
        }
    }

    let mut aggregate = aggregate.lock().await;
    std::mem::take(&mut aggregate.results)
}

/// Runs one probe in its own task so a panic becomes a failed result.
async fn probe_isolated<P: Probe>(
    probe: Arc<P>,
    document: GeneratedDocument,
    options: BatchOptions,
) -> ProbeResult {
    let overrides = document.overrides().clone();
    let description = document.description().to_string();

    let handle = tokio::spawn(async move {
        probe
            .probe(document, options.timeout, options.measure_throughput)
            .await
    });

    match handle.await {
        Ok(result) => result,
        Err(e) => {
            let reason = join_error_message(e);
            plog_fmt!(LogLevel::Warn, "Probe for '{}' crashed: {}", description, reason);
            ProbeResult::failed(overrides, description, ProbeFailure::Crashed(reason))
        }
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        "cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
