//! HTTP round-trip seam.
//!
//! The engine talks to the network through a single capability: given a
//! request, produce a buffered response or a transport error. Throttling is
//! applied by the orchestrator before this call, so implementations stay
//! oblivious to rate limits, proxies and retries.

use async_trait::async_trait;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// A single request/response round-trip.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn round_trip(&self, request: &Request) -> Result<Response, Error>;
}

/// Default client backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> ReqwestClient {
        ReqwestClient::default()
    }

    /// Wraps a preconfigured `reqwest` client (proxies, TLS, timeouts).
    pub fn with_client(client: reqwest::Client) -> ReqwestClient {
        ReqwestClient { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn round_trip(&self, request: &Request) -> Result<Response, Error> {
        let url = request.url().clone();
        let res = self
            .client
            .request(request.method().clone(), url.clone())
            .headers(request.headers().clone())
            .send()
            .await
            .map_err(|e| Error::transport(url.clone(), e))?;

        let status = res.status();
        let headers = res.headers().clone();
        let body = res
            .bytes()
            .await
            .map_err(|e| Error::transport(url, e))?;

        Ok(Response::new(request.clone(), status, headers, body))
    }
}
