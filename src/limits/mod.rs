//! Request filters and rate limits applied before a request is enqueued.

pub mod robots;
pub mod throttle;

use serde::Serialize;

use crate::error::Error;
use crate::request::Request;

/// A pre-enqueue check. Filters run in registration order; the first failure
/// is returned to the caller of `visit`/`follow`.
pub trait RequestFilter: Send + Sync {
    /// Accepts or rejects a request before it is enqueued.
    fn filter_request(&self, request: &Request) -> Result<(), Error>;

    /// Canonical serialized form of the filter. The spider dedups registered
    /// filters by this key, so two filters with the same configuration
    /// collapse into one.
    fn fingerprint(&self) -> String;
}

/// Rejects requests deeper than a maximum link depth.
#[derive(Debug, Clone, Serialize)]
pub struct MaxDepthFilter {
    max_depth: usize,
}

impl MaxDepthFilter {
    pub fn new(max_depth: usize) -> MaxDepthFilter {
        MaxDepthFilter { max_depth }
    }
}

impl RequestFilter for MaxDepthFilter {
    fn filter_request(&self, request: &Request) -> Result<(), Error> {
        if request.depth() > self.max_depth {
            return Err(Error::DepthExceeded {
                max_depth: self.max_depth,
                url: request.url().clone(),
            });
        }
        Ok(())
    }

    fn fingerprint(&self) -> String {
        fingerprint("MaxDepthFilter", self)
    }
}

/// Accepts requests whose host matches one of the configured robots-style
/// wildcard patterns (`*` and a trailing `$` anchor).
#[derive(Debug, Clone, Serialize)]
pub struct AllowedDomainsFilter {
    domains: Vec<String>,
}

impl AllowedDomainsFilter {
    pub fn new<I, S>(domains: I) -> AllowedDomainsFilter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllowedDomainsFilter {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }
}

impl RequestFilter for AllowedDomainsFilter {
    fn filter_request(&self, request: &Request) -> Result<(), Error> {
        let host = request.host();
        if self
            .domains
            .iter()
            .any(|pattern| robots::match_url_rule(pattern, host))
        {
            return Ok(());
        }
        Err(Error::ForbiddenDomain {
            url: request.url().clone(),
        })
    }

    fn fingerprint(&self) -> String {
        fingerprint("AllowedDomainsFilter", self)
    }
}

fn fingerprint<T: Serialize>(name: &str, filter: &T) -> String {
    format!(
        "{name}:{}",
        serde_json::to_string(filter).unwrap_or_default()
    )
}

/// Convenience for custom filters built from a closure.
pub struct FnFilter<F> {
    name: String,
    func: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&Request) -> Result<(), Error> + Send + Sync,
{
    /// The name doubles as the dedup key, so give distinct filters distinct
    /// names.
    pub fn new(name: impl Into<String>, func: F) -> FnFilter<F> {
        FnFilter {
            name: name.into(),
            func,
        }
    }
}

impl<F> RequestFilter for FnFilter<F>
where
    F: Fn(&Request) -> Result<(), Error> + Send + Sync,
{
    fn filter_request(&self, request: &Request) -> Result<(), Error> {
        (self.func)(request)
    }

    fn fingerprint(&self) -> String {
        format!("FnFilter:{:?}", self.name)
    }
}
