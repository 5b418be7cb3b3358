//! # Spider Module
//!
//! The crawl orchestrator: seed ingestion, the ingestor worker pool,
//! callback dispatch, and stop/resume.
//!
//! ## Overview
//!
//! A [`Spider`] owns the moving parts of a crawl: the shared request queue
//! and visited cache (the [`SpiderState`]), the throttle collection, the
//! robots rules cache, the registered filters and the callback registry.
//! `visit`/`follow` feed the queue through the enqueue path; N ingestor
//! tasks drain it, fetch pages and run the callback pipeline. The spider is
//! a cheap-clone handle, so callbacks can capture a clone and re-enter
//! `follow` while a worker is still inside them.
//!
//! ## Lifecycle
//!
//! `start` spawns the ingestors; `stop` signals them, closes the queue,
//! waits up to a deadline for them to finish and returns the crawl state;
//! `resume` restores a previously returned state and spawns again. All three
//! are idempotent.
//!
//! ## Enqueue path
//!
//! Each `visit`/`follow` runs the domain filter, then the registered filters
//! in insertion order, then the visited-cache check and insert, then the
//! robots policy, and finally inserts into the queue.
//! Failures on this path are returned to the caller and never
//! reach the error callback; errors met by workers go to the error callback
//! and never terminate the crawl.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use reqwest::header::{HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use scraper::Selector;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::VisitedCache;
use crate::client::HttpClient;
use crate::error::Error;
use crate::limits::robots::{RobotFile, RobotRules};
use crate::limits::throttle::ThrottleCollection;
use crate::limits::RequestFilter;
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::response::{Element, Response};
use crate::stats::StatCollector;
use crate::util::MAX_PRIORITY;

/// The shareable crawl state: queue and cache. Returned by [`Spider::stop`]
/// so a later [`Spider::resume`] can pick the crawl back up, and usable to
/// share a frontier between spiders.
#[derive(Clone)]
pub struct SpiderState {
    pub queue: Arc<dyn RequestQueue>,
    pub cache: Arc<dyn VisitedCache>,
}

/// How the spider treats robots.txt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RobotPolicy {
    /// Fetch and obey robots.txt, including declared crawl-delays.
    #[default]
    Follow,
    /// Skip the robots check entirely.
    Ignore,
}

/// The User-agent presented to crawled sites: a fixed string or a function
/// of the request.
#[derive(Clone)]
pub enum UserAgent {
    Static(String),
    PerRequest(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl UserAgent {
    fn for_request(&self, request: &Request) -> String {
        match self {
            UserAgent::Static(agent) => agent.clone(),
            UserAgent::PerRequest(f) => f(request),
        }
    }
}

impl From<&str> for UserAgent {
    fn from(agent: &str) -> UserAgent {
        UserAgent::Static(agent.to_string())
    }
}

impl From<String> for UserAgent {
    fn from(agent: String) -> UserAgent {
        UserAgent::Static(agent)
    }
}

type BoxFut = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type RequestCallback = dyn Fn(Request) -> Option<Request> + Send + Sync;
type ResponseCallback = dyn Fn(Arc<Response>) -> BoxFut + Send + Sync;
type ErrorCallback = dyn Fn(&Error) + Send + Sync;
type HtmlCallback = dyn Fn(Arc<Response>, Element) -> BoxFut + Send + Sync;
type PipelineDoneCallback = dyn Fn() + Send + Sync;

struct Callbacks {
    request: RwLock<Arc<RequestCallback>>,
    response: RwLock<Arc<ResponseCallback>>,
    error: RwLock<Arc<ErrorCallback>>,
    selectors: RwLock<HashMap<String, (Selector, Arc<HtmlCallback>)>>,
    pipeline_done: RwLock<Arc<PipelineDoneCallback>>,
}

impl Default for Callbacks {
    fn default() -> Callbacks {
        Callbacks {
            request: RwLock::new(Arc::new(|request: Request| Some(request))),
            response: RwLock::new(Arc::new(|_| -> BoxFut { Box::pin(async {}) })),
            error: RwLock::new(Arc::new(|_| {})),
            selectors: RwLock::new(HashMap::new()),
            pipeline_done: RwLock::new(Arc::new(|| {})),
        }
    }
}

struct Lifecycle {
    is_running: bool,
    stop_tx: Option<watch::Sender<bool>>,
    workers: Vec<JoinHandle<()>>,
}

/// Everything the builder resolves before a spider exists.
pub(crate) struct SpiderConfig {
    pub(crate) state: SpiderState,
    pub(crate) client: Arc<dyn HttpClient>,
    pub(crate) allowed_domains: Vec<Regex>,
    pub(crate) throttle: ThrottleCollection,
    pub(crate) filters: Vec<(String, Arc<dyn RequestFilter>)>,
    pub(crate) robot_policy: RobotPolicy,
    pub(crate) user_agent: UserAgent,
    pub(crate) ingestor_count: usize,
    pub(crate) default_wait_time: Duration,
    pub(crate) max_wait_time: Duration,
    pub(crate) ignore_timeouts: bool,
}

struct SpiderInner {
    state: RwLock<SpiderState>,
    client: Arc<dyn HttpClient>,
    allowed_domains: RwLock<Vec<Regex>>,
    throttle: ThrottleCollection,
    robot_rules: RobotRules,
    filters: Mutex<Vec<(String, Arc<dyn RequestFilter>)>>,
    callbacks: Callbacks,
    robot_policy: RobotPolicy,
    user_agent: UserAgent,
    ingestor_count: usize,
    default_wait_time: Duration,
    max_wait_time: Duration,
    ignore_timeouts: bool,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    stats: Arc<StatCollector>,
}

/// A parallel, polite web crawler.
///
/// Cloning is cheap and clones drive the same crawl.
#[derive(Clone)]
pub struct Spider {
    inner: Arc<SpiderInner>,
}

impl Spider {
    /// Starts configuring a spider.
    pub fn builder() -> crate::builder::SpiderBuilder {
        crate::builder::SpiderBuilder::new()
    }

    pub(crate) fn from_config(config: SpiderConfig) -> Spider {
        Spider {
            inner: Arc::new(SpiderInner {
                state: RwLock::new(config.state),
                client: config.client,
                allowed_domains: RwLock::new(config.allowed_domains),
                throttle: config.throttle,
                robot_rules: RobotRules::new(),
                filters: Mutex::new(config.filters),
                callbacks: Callbacks::default(),
                robot_policy: config.robot_policy,
                user_agent: config.user_agent,
                ingestor_count: config.ingestor_count,
                default_wait_time: config.default_wait_time,
                max_wait_time: config.max_wait_time,
                ignore_timeouts: config.ignore_timeouts,
                lifecycle: tokio::sync::Mutex::new(Lifecycle {
                    is_running: false,
                    stop_tx: None,
                    workers: Vec::new(),
                }),
                stats: Arc::new(StatCollector::new()),
            }),
        }
    }

    /*
        Getters/setters
    */

    /// The robots rules cache. Useful to preload rules or inspect what has
    /// been fetched.
    pub fn robot_rules(&self) -> &RobotRules {
        &self.inner.robot_rules
    }

    /// The throttle collection, for installing throttles mid-crawl.
    pub fn throttles(&self) -> &ThrottleCollection {
        &self.inner.throttle
    }

    /// Live crawl counters.
    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.inner.stats)
    }

    /// Replaces the allowed-domain patterns (regular expressions matched
    /// against the request host).
    pub fn set_allowed_domains(&self, patterns: &[&str]) -> Result<(), Error> {
        let regexes = compile_domains(patterns)?;
        *self.inner.allowed_domains.write() = regexes;
        Ok(())
    }

    /// Registers a filter. Filters with the same fingerprint are kept once,
    /// so repeated adds are idempotent.
    pub fn add_filter(&self, filter: impl RequestFilter + 'static) {
        let key = filter.fingerprint();
        let mut filters = self.inner.filters.lock();
        if filters.iter().any(|(existing, _)| *existing == key) {
            return;
        }
        filters.push((key, Arc::new(filter)));
    }

    /// Removes the filter with the same fingerprint, if registered.
    pub fn remove_filter(&self, filter: &dyn RequestFilter) {
        let key = filter.fingerprint();
        self.inner
            .filters
            .lock()
            .retain(|(existing, _)| *existing != key);
    }

    /*
        Callback registration. Each setter replaces the previous callback;
        selector callbacks replace per selector string.
    */

    /// Called before a dequeued request is fetched. Returning `None` skips
    /// the fetch; returning a different request substitutes it.
    pub fn on_request<F>(&self, f: F)
    where
        F: Fn(Request) -> Option<Request> + Send + Sync + 'static,
    {
        *self.inner.callbacks.request.write() = Arc::new(f);
    }

    /// Called with every received response.
    pub fn on_response<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Response>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.inner.callbacks.response.write() =
            Arc::new(move |res| -> BoxFut { Box::pin(f(res)) });
    }

    /// Called for each element matching the selector in a response body.
    /// Fails immediately on an invalid selector.
    pub fn on_html<F, Fut>(&self, selector: &str, f: F) -> Result<(), Error>
    where
        F: Fn(Arc<Response>, Element) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let compiled = Selector::parse(selector)
            .map_err(|e| Error::Parse(format!("invalid selector {selector:?}: {e}")))?;
        self.inner.callbacks.selectors.write().insert(
            selector.to_string(),
            (
                compiled,
                Arc::new(move |res, el| -> BoxFut { Box::pin(f(res, el)) }),
            ),
        );
        Ok(())
    }

    /// Called with every error met by a worker.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.inner.callbacks.error.write() = Arc::new(f);
    }

    /// Called once a response has passed through all callbacks.
    pub fn on_pipeline_finished<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.callbacks.pipeline_done.write() = Arc::new(f);
    }

    /*
        Control/navigation
    */

    /// Enqueues a seed URL with maximum priority.
    pub async fn visit(&self, path: &str) -> Result<(), Error> {
        let request = Request::new(path, None)?;
        self.schedule_request(request, MAX_PRIORITY).await
    }

    /// Enqueues a link discovered on `response` with the given priority.
    /// Relative paths resolve against the response's request.
    pub async fn follow(
        &self,
        path: &str,
        response: &Response,
        priority: i32,
    ) -> Result<(), Error> {
        let request = Request::new(path, Some(response.request()))?;
        self.schedule_request(request, priority).await
    }

    /// Fetches a URL immediately, bypassing the queue but still honoring
    /// throttles, and runs the response through the callback pipeline.
    pub async fn visit_now(&self, path: &str) -> Result<Arc<Response>, Error> {
        let request = Request::new(path, None)?;
        let response = Arc::new(self.fetch(request).await?);
        self.dispatch_response(Arc::clone(&response)).await;
        Ok(response)
    }

    /// Spawns the ingestors. No-op when already running.
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.launch(&mut lifecycle);
    }

    /// Restores a previously returned state and spawns the ingestors. No-op
    /// when already running.
    pub async fn resume(&self, state: SpiderState) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_running {
            return;
        }
        state.queue.reopen();
        *self.inner.state.write() = state;
        self.launch(&mut lifecycle);
    }

    /// Stops the spider: signals the ingestors, closes the queue and waits
    /// up to `timeout` for the workers to finish. Returns the crawl state
    /// either way; workers stuck in a slow fetch may outlive the deadline.
    /// Returns immediately when not running.
    pub async fn stop(&self, timeout: Duration) -> SpiderState {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let state = self.inner.state.read().clone();
        if !lifecycle.is_running {
            return state;
        }
        lifecycle.is_running = false;

        info!("stopping spider");
        if let Some(stop_tx) = lifecycle.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        state.queue.close();

        let workers = std::mem::take(&mut lifecycle.workers);
        if tokio::time::timeout(timeout, join_all(workers)).await.is_err() {
            warn!(?timeout, "ingestors did not finish before the deadline");
        }
        state
    }

    /// Blocks until the spider has been stopped. Returns immediately when
    /// the spider is not running.
    pub async fn wait(&self) {
        let mut stop_rx = {
            let lifecycle = self.inner.lifecycle.lock().await;
            match (&lifecycle.stop_tx, lifecycle.is_running) {
                (Some(stop_tx), true) => stop_tx.subscribe(),
                _ => return,
            }
        };
        let _ = stop_rx.changed().await;
    }

    /*
        Worker pool
    */

    fn launch(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.is_running {
            return;
        }
        lifecycle.is_running = true;

        let (stop_tx, stop_rx) = watch::channel(false);
        lifecycle.stop_tx = Some(stop_tx);
        lifecycle.workers = (0..self.inner.ingestor_count)
            .map(|id| {
                let spider = self.clone();
                let stop_rx = stop_rx.clone();
                tokio::spawn(async move { spider.ingest(id, stop_rx).await })
            })
            .collect();
        info!(ingestors = self.inner.ingestor_count, "spider started");
    }

    async fn ingest(self, id: usize, mut stop_rx: watch::Receiver<bool>) {
        debug!(ingestor = id, "ingestor started");
        loop {
            let receiver = self.queue().dequeue();
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                result = receiver.recv() => match result {
                    Ok(Ok(request)) => self.run_pipeline(request).await,
                    Ok(Err(err)) => self.emit_error(&err),
                    // Channel closed without delivery: the queue was closed.
                    Err(_) => break,
                },
            }
        }
        debug!(ingestor = id, "ingestor stopped");
    }

    async fn run_pipeline(&self, request: Request) {
        let request_callback = self.inner.callbacks.request.read().clone();
        let request = match request_callback(request) {
            Some(request) => request,
            None => {
                trace!("request callback cancelled the fetch");
                return;
            }
        };

        match self.fetch(request).await {
            Ok(response) => self.dispatch_response(Arc::new(response)).await,
            Err(err) => self.emit_error(&err),
        }
    }

    /// Waits for throttles and performs the HTTP round-trip.
    async fn fetch(&self, mut request: Request) -> Result<Response, Error> {
        self.inner.throttle.wait(&request).await;

        let agent = self.inner.user_agent.for_request(&request);
        if let Ok(value) = HeaderValue::from_str(&agent) {
            request.headers_mut().insert(USER_AGENT, value);
        }

        trace!(url = %request.url(), "fetching");
        self.inner.stats.increment_requests_sent();
        let response = self.inner.client.round_trip(&request).await?;
        self.inner.stats.record_response(response.status().as_u16());
        Ok(response)
    }

    async fn dispatch_response(&self, response: Arc<Response>) {
        self.check_server_backoff(&response);

        let response_callback = self.inner.callbacks.response.read().clone();
        response_callback(Arc::clone(&response)).await;

        self.run_selectors(&response).await;

        let done = self.inner.callbacks.pipeline_done.read().clone();
        done();
    }

    async fn run_selectors(&self, response: &Arc<Response>) {
        let selectors: Vec<(Selector, Arc<HtmlCallback>)> = {
            let registered = self.inner.callbacks.selectors.read();
            if registered.is_empty() {
                return;
            }
            registered
                .values()
                .map(|(selector, callback)| (selector.clone(), Arc::clone(callback)))
                .collect()
        };

        // Parse once and detach the matches from the document, so no borrow
        // of the parsed tree crosses into user callbacks.
        let mut matches = Vec::new();
        {
            let document = response.document();
            for (selector, callback) in &selectors {
                for element in document.select(selector) {
                    matches.push((Arc::clone(callback), Element::from_element_ref(&element)));
                }
            }
        }

        for (callback, element) in matches {
            callback(Arc::clone(response), element).await;
        }
    }

    /// On 429/503 responses, installs a one-shot back-off gate from the
    /// Retry-After header, falling back to the configured default.
    fn check_server_backoff(&self, response: &Response) {
        if self.inner.ignore_timeouts {
            return;
        }
        let status = response.status();
        if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
            return;
        }

        let wait = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after)
            .unwrap_or(self.inner.default_wait_time)
            .min(self.inner.max_wait_time);

        warn!(status = %status, ?wait, "server requested back-off");
        self.inner.throttle.set_wait_time(wait);
    }

    fn emit_error(&self, err: &Error) {
        self.inner.stats.increment_errors();
        let error_callback = self.inner.callbacks.error.read().clone();
        error_callback(err);
    }

    /*
        Enqueue path
    */

    async fn schedule_request(&self, request: Request, priority: i32) -> Result<(), Error> {
        let result = self.try_schedule(request, priority).await;
        match &result {
            Ok(()) => self.inner.stats.increment_requests_enqueued(),
            Err(err) if err.is_filtered() => self.inner.stats.increment_requests_filtered(),
            Err(_) => {}
        }
        result
    }

    async fn try_schedule(&self, request: Request, priority: i32) -> Result<(), Error> {
        self.check_domain(&request)?;
        self.apply_filters(&request)?;

        let (queue, cache) = self.backends();

        // Record the URL before the robots check: a robot-denied URL is not
        // retried.
        if cache.visited_url(&request).await? {
            return Err(Error::AlreadyVisited {
                url: request.url().clone(),
            });
        }
        cache.add_request(&request).await?;

        self.check_robot_rules(&request).await?;

        trace!(url = %request.url(), priority, "enqueueing");
        queue.enqueue(request, priority).await
    }

    // An empty pattern list denies every host: nothing is crawled until the
    // caller says which domains are fair game.
    fn check_domain(&self, request: &Request) -> Result<(), Error> {
        let domains = self.inner.allowed_domains.read();
        if domains.iter().any(|d| d.is_match(request.host())) {
            return Ok(());
        }
        Err(Error::ForbiddenDomain {
            url: request.url().clone(),
        })
    }

    fn apply_filters(&self, request: &Request) -> Result<(), Error> {
        let filters: Vec<Arc<dyn RequestFilter>> = self
            .inner
            .filters
            .lock()
            .iter()
            .map(|(_, filter)| Arc::clone(filter))
            .collect();
        for filter in filters {
            filter.filter_request(request)?;
        }
        Ok(())
    }

    async fn check_robot_rules(&self, request: &Request) -> Result<(), Error> {
        match self.inner.robot_policy {
            RobotPolicy::Ignore => Ok(()),
            RobotPolicy::Follow => {
                let host = request.host().to_string();
                let rules = match self.inner.robot_rules.rules_for_host(&host) {
                    Ok(rules) => rules,
                    Err(_) => self.download_robot_rules(request).await?,
                };

                let agent = self.inner.user_agent.for_request(request);
                if !rules.allowed(&agent, request.url().path()) {
                    return Err(Error::RobotDenied {
                        url: request.url().clone(),
                    });
                }

                // A declared crawl-delay becomes the host's throttle.
                if let Some(delay) = rules.delay(&agent) {
                    self.inner.throttle.ensure_domain_throttle(&host, delay);
                }
                Ok(())
            }
        }
    }

    /// Fetches and caches robots.txt for the request's host, through the
    /// same throttled HTTP path as regular requests.
    async fn download_robot_rules(&self, request: &Request) -> Result<Arc<RobotFile>, Error> {
        let mut robots_request = Request::new(request.robots_url().as_str(), None)?;

        self.inner.throttle.wait(&robots_request).await;
        let agent = self.inner.user_agent.for_request(&robots_request);
        if let Ok(value) = HeaderValue::from_str(&agent) {
            robots_request.headers_mut().insert(USER_AGENT, value);
        }

        debug!(url = %robots_request.url(), "downloading robots.txt");
        self.inner.stats.increment_requests_sent();
        let response = self.inner.client.round_trip(&robots_request).await?;
        self.inner.stats.record_response(response.status().as_u16());
        self.inner
            .robot_rules
            .add_rules(&response.text(), request.host())
    }

    fn backends(&self) -> (Arc<dyn RequestQueue>, Arc<dyn VisitedCache>) {
        let state = self.inner.state.read();
        (Arc::clone(&state.queue), Arc::clone(&state.cache))
    }

    fn queue(&self) -> Arc<dyn RequestQueue> {
        Arc::clone(&self.inner.state.read().queue)
    }
}

pub(crate) fn compile_domains(patterns: &[&str]) -> Result<Vec<Regex>, Error> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| Error::Config(format!("invalid domain pattern {pattern:?}: {e}")))
        })
        .collect()
}

/// Parses a Retry-After header value: integer seconds or an HTTP-date.
/// Past dates yield `None`, letting the caller fall back to its default.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    when.signed_duration_since(chrono::Utc::now()).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SpiderBuilder;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned bodies per URL; 404 with an empty body otherwise.
    struct MockClient {
        pages: HashMap<String, String>,
    }

    impl MockClient {
        fn new<const N: usize>(pages: [(&str, &str); N]) -> MockClient {
            MockClient {
                pages: pages
                    .into_iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockClient {
        async fn round_trip(&self, request: &Request) -> Result<Response, Error> {
            let (status, body) = match self.pages.get(request.url().as_str()) {
                Some(body) => (StatusCode::OK, body.clone()),
                None => (StatusCode::NOT_FOUND, String::new()),
            };
            Ok(Response::new(
                request.clone(),
                status,
                HeaderMap::new(),
                Bytes::from(body),
            ))
        }
    }

    fn spider_with_client(client: MockClient) -> Spider {
        SpiderBuilder::new()
            .ignore_robots()
            .allowed_domains(["example\\.com"])
            .http_client(Arc::new(client))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn unconfigured_domains_deny_every_host() {
        let spider = SpiderBuilder::new()
            .ignore_robots()
            .http_client(Arc::new(MockClient::new([])))
            .build()
            .unwrap();

        let err = spider.visit("http://example.com/").await.unwrap_err();
        assert!(matches!(err, Error::ForbiddenDomain { .. }));
    }

    #[tokio::test]
    async fn visiting_the_same_url_twice_is_rejected() {
        let spider = spider_with_client(MockClient::new([]));

        spider.visit("http://example.com/page").await.unwrap();
        let err = spider.visit("http://example.com/page").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyVisited { .. }));
    }

    #[tokio::test]
    async fn hosts_outside_allowed_domains_are_rejected() {
        let spider = spider_with_client(MockClient::new([]));
        spider.set_allowed_domains(&["example\\.com"]).unwrap();

        spider.visit("http://example.com/ok").await.unwrap();
        let err = spider.visit("http://elsewhere.org/x").await.unwrap_err();
        assert!(matches!(err, Error::ForbiddenDomain { .. }));
    }

    #[tokio::test]
    async fn max_depth_filter_rejects_deep_follows() {
        let spider = SpiderBuilder::new()
            .ignore_robots()
            .allowed_domains(["example\\.com"])
            .max_depth(1)
            .http_client(Arc::new(MockClient::new([])))
            .build()
            .unwrap();

        let seed = Request::new("http://example.com/", None).unwrap();
        let child = Request::new("http://example.com/a", Some(&seed)).unwrap();
        let response = Response::new(child, StatusCode::OK, HeaderMap::new(), Bytes::new());

        let err = spider.follow("/b", &response, 1).await.unwrap_err();
        assert!(matches!(err, Error::DepthExceeded { max_depth: 1, .. }));
    }

    #[tokio::test]
    async fn duplicate_filters_collapse_by_fingerprint() {
        let spider = spider_with_client(MockClient::new([]));
        spider.add_filter(crate::limits::MaxDepthFilter::new(3));
        spider.add_filter(crate::limits::MaxDepthFilter::new(3));
        assert_eq!(spider.inner.filters.lock().len(), 1);

        spider.remove_filter(&crate::limits::MaxDepthFilter::new(3));
        assert!(spider.inner.filters.lock().is_empty());
    }

    #[tokio::test]
    async fn robots_rules_deny_disallowed_paths() {
        let spider = SpiderBuilder::new()
            .allowed_domains(["example\\.com"])
            .http_client(Arc::new(MockClient::new([])))
            .build()
            .unwrap();
        spider
            .robot_rules()
            .add_rules("User-agent: *\nDisallow: /private", "example.com")
            .unwrap();

        spider.visit("http://example.com/public").await.unwrap();
        let err = spider
            .visit("http://example.com/private/x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RobotDenied { .. }));
    }

    #[tokio::test]
    async fn robots_crawl_delay_installs_a_domain_throttle() {
        let spider = SpiderBuilder::new()
            .allowed_domains(["example\\.com"])
            .http_client(Arc::new(MockClient::new([])))
            .build()
            .unwrap();
        spider
            .robot_rules()
            .add_rules("User-agent: *\nCrawl-delay: 2", "example.com")
            .unwrap();

        spider.visit("http://example.com/").await.unwrap();
        assert_eq!(
            spider.throttles().domain_interval("example.com"),
            Some(Duration::from_secs(2))
        );
    }

    #[tokio::test]
    async fn robots_are_fetched_once_and_cached() {
        let spider = SpiderBuilder::new()
            .allowed_domains(["example\\.com"])
            .http_client(Arc::new(MockClient::new([(
                "http://example.com/robots.txt",
                "User-agent: *\nDisallow: /private",
            )])))
            .build()
            .unwrap();

        spider.visit("http://example.com/a").await.unwrap();
        assert!(spider.robot_rules().rules_for_host("example.com").is_ok());
        let err = spider
            .visit("http://example.com/private/b")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RobotDenied { .. }));
        // Only the robots.txt request itself hit the network.
        assert_eq!(spider.stats().requests_sent.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn crawl_follows_links_until_stopped() {
        let client = MockClient::new([
            (
                "http://example.com/",
                r#"<html><body><a href="/a">a</a><a href="/b">b</a></body></html>"#,
            ),
            (
                "http://example.com/a",
                r#"<html><body><a href="/b">b</a></body></html>"#,
            ),
            ("http://example.com/b", "<html><body>done</body></html>"),
        ]);
        let spider = SpiderBuilder::new()
            .ignore_robots()
            .allowed_domains(["example\\.com"])
            .ingestors(2)
            .http_client(Arc::new(client))
            .build()
            .unwrap();

        let responses = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&responses);
        spider.on_response(move |_res| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        });

        let follower = spider.clone();
        spider
            .on_html("a[href]", move |res, el| {
                let spider = follower.clone();
                async move {
                    if let Some(href) = el.attr("href") {
                        // Duplicate and filtered links are expected here.
                        let _ = spider.follow(href, &res, 1).await;
                    }
                }
            })
            .unwrap();

        spider.visit("http://example.com/").await.unwrap();
        spider.start().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while responses.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("crawl did not reach all three pages");

        spider.stop(Duration::from_secs(5)).await;
        assert!(responses.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let spider = spider_with_client(MockClient::new([]));

        spider.start().await;
        spider.start().await;
        let _ = spider.stop(Duration::from_secs(1)).await;
        let state = spider.stop(Duration::from_secs(1)).await;

        // Stopped spider returns its state immediately.
        assert_eq!(state.queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resume_continues_from_returned_state() {
        let pages = [(
            "http://example.com/seed",
            "<html><body>seed</body></html>",
        )];
        let spider = spider_with_client(MockClient::new(pages));

        spider.visit("http://example.com/seed").await.unwrap();
        let state = spider.stop(Duration::from_secs(1)).await;
        assert_eq!(state.queue.count().await.unwrap(), 1);

        let responses = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&responses);

        let resumed = spider_with_client(MockClient::new(pages));
        resumed.on_response(move |_res| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        });
        resumed.resume(state).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while responses.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("resumed spider did not drain the queue");
        resumed.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn request_callback_can_cancel_and_replace() {
        let pages = [
            ("http://example.com/skip", "<html>skip</html>"),
            ("http://example.com/real", "<html>real</html>"),
            ("http://example.com/replaced", "<html>replaced</html>"),
        ];
        let spider = spider_with_client(MockClient::new(pages));

        let fetched = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&fetched);
        spider.on_response(move |res| {
            record.lock().push(res.request().url().to_string());
            async {}
        });

        spider.on_request(|req| {
            let path = req.url().path().to_string();
            match path.as_str() {
                "/skip" => None,
                "/real" => Some(Request::new("http://example.com/replaced", None).ok()?),
                _ => Some(req),
            }
        });

        spider.visit("http://example.com/skip").await.unwrap();
        spider.visit("http://example.com/real").await.unwrap();
        spider.start().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while fetched.lock().len() < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no response arrived");
        spider.stop(Duration::from_secs(1)).await;

        let fetched = fetched.lock();
        assert!(fetched.contains(&"http://example.com/replaced".to_string()));
        assert!(!fetched.contains(&"http://example.com/skip".to_string()));
    }

    #[tokio::test]
    async fn visit_now_runs_the_pipeline() {
        let spider = spider_with_client(MockClient::new([(
            "http://example.com/now",
            r#"<html><body><a href="/next">next</a></body></html>"#,
        )]));

        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        spider.on_pipeline_finished(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let links = Arc::clone(&seen);
        spider
            .on_html("a[href]", move |_res, el| {
                links
                    .lock()
                    .push(el.attr("href").unwrap_or_default().to_string());
                async {}
            })
            .unwrap();

        let response = spider.visit_now("http://example.com/now").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec!["/next".to_string()]);
    }

    #[test]
    fn retry_after_parses_seconds_and_http_dates() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));

        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        let parsed = parse_retry_after(&future.to_rfc2822()).unwrap();
        assert!(parsed <= Duration::from_secs(30));
        assert!(parsed > Duration::from_secs(25));

        // Past dates and garbage fall back to the caller's default.
        let past = chrono::Utc::now() - chrono::Duration::seconds(30);
        assert_eq!(parse_retry_after(&past.to_rfc2822()), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[tokio::test]
    async fn server_backoff_is_installed_from_retry_after() {
        let spider = spider_with_client(MockClient::new([]));

        let request = Request::new("http://example.com/limited", None).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        let response = Response::new(
            request,
            StatusCode::TOO_MANY_REQUESTS,
            headers,
            Bytes::new(),
        );

        tokio::time::pause();
        spider.check_server_backoff(&response);

        let probe = Request::new("http://other.org/", None).unwrap();
        let start = tokio::time::Instant::now();
        spider.inner.throttle.wait(&probe).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
