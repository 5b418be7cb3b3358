//! Crawl counters.
//!
//! A small set of atomic metrics updated by the orchestrator as requests
//! move through the pipeline. Cheap enough to always be on; read them live
//! through [`crate::Spider::stats`] or print the [`std::fmt::Display`]
//! summary after a crawl.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

/// Counters describing a crawl's progress.
#[derive(Debug, Default)]
pub struct StatCollector {
    /// Requests accepted onto the queue.
    pub requests_enqueued: AtomicUsize,
    /// Requests rejected by the enqueue path (domain, filters, cache, robots).
    pub requests_filtered: AtomicUsize,
    /// Requests handed to the HTTP client.
    pub requests_sent: AtomicUsize,
    /// Responses that came back.
    pub responses_received: AtomicUsize,
    /// Errors delivered to the error callback.
    pub errors: AtomicUsize,
    /// Response count per HTTP status code.
    pub response_status_counts: DashMap<u16, usize>,
}

impl StatCollector {
    pub(crate) fn new() -> StatCollector {
        StatCollector::default()
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_requests_filtered(&self) {
        self.requests_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self, status: u16) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        *self.response_status_counts.entry(status).or_insert(0) += 1;
    }
}

impl fmt::Display for StatCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Crawl statistics")?;
        writeln!(
            f,
            "  requests : enqueued: {}, filtered: {}, sent: {}",
            self.requests_enqueued.load(Ordering::Relaxed),
            self.requests_filtered.load(Ordering::Relaxed),
            self.requests_sent.load(Ordering::Relaxed),
        )?;
        writeln!(
            f,
            "  responses: {}, errors: {}",
            self.responses_received.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )?;

        let mut statuses: Vec<(u16, usize)> = self
            .response_status_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        statuses.sort_unstable();
        let rendered = if statuses.is_empty() {
            "none".to_string()
        } else {
            statuses
                .iter()
                .map(|(code, count)| format!("{code}: {count}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "  status   : {rendered}")
    }
}
