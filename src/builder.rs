//! # Builder Module
//!
//! Fluent construction of [`Spider`] instances.
//!
//! ## Overview
//!
//! The builder collects the crawl configuration (parallelism, domain
//! restrictions, depth limit, throttles, robots policy, user agent, back-off
//! behavior, backend injection), validates it, and assembles the spider
//! with sensible defaults for everything left unset: one ingestor, an
//! in-memory queue of 10 000 requests, an in-memory visited cache, a
//! `reqwest` HTTP client and a robots-following policy.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use wayfarer::Spider;
//!
//! let spider = Spider::builder()
//!     .allowed_domains(["example\\.com"])
//!     .ingestors(4)
//!     .max_depth(10)
//!     .throttle(Duration::from_millis(100))
//!     .user_agent("mybot/1.0")
//!     .build()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MemoryCache, VisitedCache};
use crate::client::{HttpClient, ReqwestClient};
use crate::error::Error;
use crate::limits::throttle::ThrottleCollection;
use crate::limits::{MaxDepthFilter, RequestFilter};
use crate::queue::{HeapQueue, RequestQueue};
use crate::request::Request;
use crate::spider::{compile_domains, RobotPolicy, Spider, SpiderConfig, SpiderState, UserAgent};

const DEFAULT_QUEUE_SIZE: usize = 10_000;
const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(10);
const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_secs(300);

/// Configures and builds a [`Spider`].
pub struct SpiderBuilder {
    ingestor_count: usize,
    allowed_domains: Vec<String>,
    max_depth: Option<usize>,
    default_throttle: Option<Duration>,
    domain_throttles: Vec<(String, Duration)>,
    robot_policy: RobotPolicy,
    user_agent: UserAgent,
    default_wait_time: Duration,
    max_wait_time: Duration,
    ignore_timeouts: bool,
    max_queue_size: usize,
    queue: Option<Arc<dyn RequestQueue>>,
    cache: Option<Arc<dyn VisitedCache>>,
    client: Option<Arc<dyn HttpClient>>,
}

impl Default for SpiderBuilder {
    fn default() -> SpiderBuilder {
        SpiderBuilder {
            ingestor_count: 1,
            allowed_domains: Vec::new(),
            max_depth: None,
            default_throttle: None,
            domain_throttles: Vec::new(),
            robot_policy: RobotPolicy::Follow,
            user_agent: UserAgent::Static(concat!("wayfarer/", env!("CARGO_PKG_VERSION")).into()),
            default_wait_time: DEFAULT_WAIT_TIME,
            max_wait_time: DEFAULT_MAX_WAIT_TIME,
            ignore_timeouts: false,
            max_queue_size: DEFAULT_QUEUE_SIZE,
            queue: None,
            cache: None,
            client: None,
        }
    }
}

impl SpiderBuilder {
    pub fn new() -> SpiderBuilder {
        SpiderBuilder::default()
    }

    /// Number of parallel ingestor workers. Default 1.
    pub fn ingestors(mut self, count: usize) -> SpiderBuilder {
        self.ingestor_count = count;
        self
    }

    /// Restricts the crawl to hosts matching these regular expressions.
    /// Every host is denied until at least one pattern is configured.
    pub fn allowed_domains<I, S>(mut self, patterns: I) -> SpiderBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Installs the built-in depth filter.
    pub fn max_depth(mut self, depth: usize) -> SpiderBuilder {
        self.max_depth = Some(depth);
        self
    }

    /// Global minimum interval between requests to hosts without their own
    /// throttle.
    pub fn throttle(mut self, interval: Duration) -> SpiderBuilder {
        self.default_throttle = Some(interval);
        self
    }

    /// Minimum interval between requests to one host, overriding the
    /// default throttle.
    pub fn domain_throttle(mut self, host: impl Into<String>, interval: Duration) -> SpiderBuilder {
        self.domain_throttles.push((host.into(), interval));
        self
    }

    /// Sets the robots.txt policy. Default: follow.
    pub fn robot_policy(mut self, policy: RobotPolicy) -> SpiderBuilder {
        self.robot_policy = policy;
        self
    }

    /// Shorthand for `robot_policy(RobotPolicy::Ignore)`.
    pub fn ignore_robots(self) -> SpiderBuilder {
        self.robot_policy(RobotPolicy::Ignore)
    }

    /// Fixed User-agent string.
    pub fn user_agent(mut self, agent: impl Into<String>) -> SpiderBuilder {
        self.user_agent = UserAgent::Static(agent.into());
        self
    }

    /// User-agent computed per request.
    pub fn user_agent_fn<F>(mut self, f: F) -> SpiderBuilder
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.user_agent = UserAgent::PerRequest(Arc::new(f));
        self
    }

    /// Back-off applied on 429/503 when no Retry-After header is present.
    pub fn default_wait_time(mut self, wait: Duration) -> SpiderBuilder {
        self.default_wait_time = wait;
        self
    }

    /// Upper bound on any server-directed back-off.
    pub fn max_wait_time(mut self, wait: Duration) -> SpiderBuilder {
        self.max_wait_time = wait;
        self
    }

    /// When set, 429/503 responses do not trigger back-off.
    pub fn ignore_timeouts(mut self, ignore: bool) -> SpiderBuilder {
        self.ignore_timeouts = ignore;
        self
    }

    /// Capacity of the default in-memory queue. Ignored when a queue is
    /// injected.
    pub fn queue_size(mut self, max_size: usize) -> SpiderBuilder {
        self.max_queue_size = max_size;
        self
    }

    /// Injects a request queue, e.g. a Redis-backed one shared between
    /// spiders.
    pub fn queue(mut self, queue: Arc<dyn RequestQueue>) -> SpiderBuilder {
        self.queue = Some(queue);
        self
    }

    /// Injects a visited cache, e.g. a Redis-backed one shared between
    /// spiders.
    pub fn cache(mut self, cache: Arc<dyn VisitedCache>) -> SpiderBuilder {
        self.cache = Some(cache);
        self
    }

    /// Injects an HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> SpiderBuilder {
        self.client = Some(client);
        self
    }

    /// Validates the configuration and builds the spider.
    pub fn build(self) -> Result<Spider, Error> {
        if self.ingestor_count == 0 {
            return Err(Error::Config("ingestors must be greater than 0".into()));
        }

        let allowed_domains = compile_domains(
            &self
                .allowed_domains
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        )?;

        let throttle = ThrottleCollection::new();
        if let Some(interval) = self.default_throttle {
            throttle.set_default_throttle(interval);
        }
        for (host, interval) in self.domain_throttles {
            throttle.set_domain_throttle(host, interval);
        }

        let mut filters: Vec<(String, Arc<dyn RequestFilter>)> = Vec::new();
        if let Some(depth) = self.max_depth {
            let filter = MaxDepthFilter::new(depth);
            filters.push((filter.fingerprint(), Arc::new(filter)));
        }

        let state = SpiderState {
            queue: self
                .queue
                .unwrap_or_else(|| Arc::new(HeapQueue::new(self.max_queue_size))),
            cache: self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new())),
        };

        Ok(Spider::from_config(SpiderConfig {
            state,
            client: self
                .client
                .unwrap_or_else(|| Arc::new(ReqwestClient::new())),
            allowed_domains,
            throttle,
            filters,
            robot_policy: self.robot_policy,
            user_agent: self.user_agent,
            ingestor_count: self.ingestor_count,
            default_wait_time: self.default_wait_time,
            max_wait_time: self.max_wait_time,
            ignore_timeouts: self.ignore_timeouts,
        }))
    }
}
