//! # Request Module
//!
//! Defines the immutable crawl unit passed between the queue, workers and
//! callbacks.
//!
//! ## Overview
//!
//! A `Request` carries an absolute URL, an optional reference to the parent
//! URL it was discovered on, its link depth, the HTTP method and a header
//! bag. Requests are constructed from a path string: relative paths are
//! resolved against the parent request (inheriting scheme and host), and
//! embedded newlines are stripped before parsing.
//!
//! Requests crossing a distributed queue boundary serialize as a JSON object
//! with `Depth`, `Method` and `URL` keys; malformed entries are rejected at
//! deserialization time rather than panicking downstream.

use std::fmt;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::Error;

/// A single to-be-visited URL, together with its crawl provenance.
#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    parent_url: Option<Url>,
    depth: usize,
    method: Method,
    headers: HeaderMap,
    host: String,
}

impl Request {
    /// Builds a request from a path, resolving relative paths against the
    /// parent request.
    ///
    /// Seeds have depth 0; followed links have their parent's depth plus one.
    /// A relative path without a parent is an error, never a silently
    /// invalid URL.
    pub fn new(path: &str, parent: Option<&Request>) -> Result<Request, Error> {
        let cleaned: String = path.chars().filter(|c| *c != '\n' && *c != '\r').collect();

        let url = match Url::parse(&cleaned) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let parent = parent.ok_or_else(|| Error::RelativeUrl(cleaned.clone()))?;
                parent.url.join(&cleaned).map_err(|source| Error::InvalidUrl {
                    path: cleaned.clone(),
                    source,
                })?
            }
            Err(source) => {
                return Err(Error::InvalidUrl {
                    path: cleaned,
                    source,
                })
            }
        };

        let (parent_url, depth) = match parent {
            Some(parent) => (Some(parent.url.clone()), parent.depth + 1),
            None => (None, 0),
        };

        Ok(Request::from_parts(url, parent_url, depth, Method::GET))
    }

    fn from_parts(url: Url, parent_url: Option<Url>, depth: usize, method: Method) -> Request {
        let host = host_key(&url);
        Request {
            url,
            parent_url,
            depth,
            method,
            headers: HeaderMap::new(),
            host,
        }
    }

    /// The absolute URL to fetch.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The URL of the page this request was discovered on, if any.
    pub fn parent_url(&self) -> Option<&Url> {
        self.parent_url.as_ref()
    }

    /// Link depth: 0 for seeds, parent depth + 1 for followed links.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Host (including any explicit port), used as the key for throttles,
    /// robots rules and domain filters.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The URL of the robots.txt file governing this request.
    pub(crate) fn robots_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_path("/robots.txt");
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Wire form used when a request crosses a distributed store boundary.
#[derive(Serialize, Deserialize)]
struct WireRequest {
    #[serde(rename = "Depth")]
    depth: usize,
    #[serde(rename = "Method")]
    method: String,
    #[serde(rename = "URL")]
    url: String,
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireRequest {
            depth: self.depth,
            method: self.method.as_str().to_string(),
            url: self.url.to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Request, D::Error> {
        let wire = WireRequest::deserialize(deserializer)?;
        let url = Url::parse(&wire.url)
            .map_err(|e| D::Error::custom(format!("invalid URL {}: {e}", wire.url)))?;
        let method = Method::from_bytes(wire.method.as_bytes())
            .map_err(|e| D::Error::custom(format!("invalid method {}: {e}", wire.method)))?;
        Ok(Request::from_parts(url, None, wire.depth, method))
    }
}
