//! # Throttle Module
//!
//! Rate limiting for polite crawling.
//!
//! ## Overview
//!
//! A [`Throttle`] is a periodic gate: `wait` completes once per interval, so
//! two consecutive waits are always at least one interval apart. The
//! [`ThrottleCollection`] picks the right gate per request (a host-specific
//! throttle if one is installed, the default otherwise, no wait if neither
//! exists) and additionally carries a one-shot back-off deadline installed
//! when a server answers 429/503. The back-off gate shadows every throttle
//! and is consumed by the first `wait` that observes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::request::Request;

/// A periodic gate enforcing a minimum interval between requests.
pub struct Throttle {
    interval: Duration,
    // Created on first wait: tokio timers cannot be built outside a runtime,
    // and throttles are configured from synchronous builder code.
    ticker: tokio::sync::Mutex<Option<Interval>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Throttle {
        Throttle {
            interval,
            ticker: tokio::sync::Mutex::new(None),
        }
    }

    /// Blocks until the next tick. Concurrent waiters serialize, so each
    /// waiter gets its own tick.
    pub async fn wait(&self) {
        let mut slot = self.ticker.lock().await;
        let ticker = slot.get_or_insert_with(|| {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Default, per-host and back-off throttles behind one `wait` call.
#[derive(Default)]
pub struct ThrottleCollection {
    default: RwLock<Option<Arc<Throttle>>>,
    domains: RwLock<HashMap<String, Arc<Throttle>>>,
    backoff_until: Mutex<Option<Instant>>,
}

impl ThrottleCollection {
    pub fn new() -> ThrottleCollection {
        ThrottleCollection::default()
    }

    /// Installs or replaces the default throttle applied to hosts without
    /// their own.
    pub fn set_default_throttle(&self, interval: Duration) {
        *self.default.write() = Some(Arc::new(Throttle::new(interval)));
    }

    /// Installs or replaces the throttle for a host.
    pub fn set_domain_throttle(&self, host: impl Into<String>, interval: Duration) {
        self.domains
            .write()
            .insert(host.into(), Arc::new(Throttle::new(interval)));
    }

    /// Installs a host throttle only when none exists yet or the interval
    /// changed, so repeated installs do not reset a live ticker.
    pub(crate) fn ensure_domain_throttle(&self, host: &str, interval: Duration) {
        {
            let domains = self.domains.read();
            if let Some(existing) = domains.get(host) {
                if existing.interval() == interval {
                    return;
                }
            }
        }
        debug!(host, ?interval, "installing domain throttle");
        self.set_domain_throttle(host, interval);
    }

    /// The interval of the throttle installed for a host, if any.
    pub fn domain_interval(&self, host: &str) -> Option<Duration> {
        self.domains.read().get(host).map(|t| t.interval())
    }

    /// Arms a one-shot back-off: the next `wait` anywhere sleeps out this
    /// duration in addition to its normal throttle, then the gate clears.
    pub fn set_wait_time(&self, duration: Duration) {
        *self.backoff_until.lock() = Some(Instant::now() + duration);
    }

    /// Blocks until the request may be issued.
    pub async fn wait(&self, request: &Request) {
        let backoff = self.backoff_until.lock().take();
        if let Some(until) = backoff {
            debug!(host = request.host(), "serving back-off gate");
            tokio::time::sleep_until(until).await;
        }

        let throttle = {
            let domains = self.domains.read();
            domains.get(request.host()).cloned()
        };
        let throttle = throttle.or_else(|| self.default.read().clone());

        if let Some(throttle) = throttle {
            throttle.wait().await;
        }
    }
}
