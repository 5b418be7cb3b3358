//! Error types surfaced by the crawling engine.
//!
//! Errors raised on the enqueue path (`visit`/`follow`) are returned to the
//! caller directly; errors encountered by ingestor workers are delivered to
//! the error callback and never terminate the crawl.

use url::Url;

use crate::limits::robots::RobotsParseError;

/// All failure modes of the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request's host does not match the spider's allowed domains.
    #[error("request to {url} filtered, not in allowed domains")]
    ForbiddenDomain { url: Url },

    /// The request's URL has been visited before.
    #[error("request to {url} filtered, already visited")]
    AlreadyVisited { url: Url },

    /// The request's depth exceeds the configured maximum.
    #[error("maximum depth reached ({max_depth}) for {url}")]
    DepthExceeded { max_depth: usize, url: Url },

    /// A request was rejected by a custom filter.
    #[error("request filtered: {0}")]
    Filtered(String),

    /// The request queue has reached its maximum size.
    #[error("request queue has reached maximum size of {max_size}")]
    QueueFull { max_size: usize },

    /// Enqueue was attempted on a closed queue.
    #[error("request queue is closed")]
    QueueClosed,

    /// The request was denied by the site's robots.txt file.
    #[error("request for {url} denied by robots.txt")]
    RobotDenied { url: Url },

    /// The site's robots.txt file could not be parsed.
    #[error("robots.txt for {host} invalid: {source}")]
    InvalidRobots {
        host: String,
        #[source]
        source: RobotsParseError,
    },

    /// No robots.txt rules are cached for the host.
    #[error("no robots.txt rules cached for host {0}")]
    RobotRulesNotCached(String),

    /// The HTTP round-trip failed.
    #[error("transport error for {url}: {source}")]
    Transport {
        url: Url,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A CSS selector or document could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A distributed queue or cache backend failed.
    #[error("storage backend error: {0}")]
    Store(String),

    /// A path could not be parsed into a URL.
    #[error("invalid URL {path}: {source}")]
    InvalidUrl {
        path: String,
        #[source]
        source: url::ParseError,
    },

    /// A relative path was given without a parent request to resolve against.
    #[error("relative URL {0} cannot be resolved without a parent request")]
    RelativeUrl(String),

    /// The spider was constructed with an invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn transport<E>(url: Url, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Transport {
            url,
            source: Box::new(source),
        }
    }

    /// Returns true for errors produced by the enqueue path's filters, which
    /// reflect caller intent rather than crawl failures.
    pub fn is_filtered(&self) -> bool {
        matches!(
            self,
            Error::ForbiddenDomain { .. }
                | Error::AlreadyVisited { .. }
                | Error::DepthExceeded { .. }
                | Error::Filtered(_)
                | Error::RobotDenied { .. }
        )
    }
}
