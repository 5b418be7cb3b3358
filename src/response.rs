//! # Response Module
//!
//! A fetched page: the originating request, the HTTP status, headers and
//! buffered body, and a lazily parsed document handle.
//!
//! The body is buffered exactly once when the response is built; the HTML
//! document is parsed at most once, on first selector use, and memoized for
//! the rest of the response's life.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};

use crate::error::Error;
use crate::request::Request;

/// A fetched page, consumed by the callback pipeline.
#[derive(Debug)]
pub struct Response {
    request: Request,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    document: OnceLock<Html>,
}

impl Response {
    pub fn new(request: Request, status: StatusCode, headers: HeaderMap, body: Bytes) -> Response {
        Response {
            request,
            status,
            headers,
            body,
            document: OnceLock::new(),
        }
    }

    /// The request that produced this response.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// The parsed HTML document. Parsing happens on first access and is
    /// memoized.
    pub fn document(&self) -> &Html {
        self.document
            .get_or_init(|| Html::parse_document(&self.text()))
    }

    /// All elements matching the selector, as owned values.
    pub fn select(&self, selector: &str) -> Result<Vec<Element>, Error> {
        let selector = Selector::parse(selector)
            .map_err(|e| Error::Parse(format!("invalid selector {selector:?}: {e}")))?;
        Ok(self
            .document()
            .select(&selector)
            .map(|el| Element::from_element_ref(&el))
            .collect())
    }
}

/// An owned view of a single selector match, detached from the document so
/// it can outlive the borrow and cross task boundaries.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    attrs: HashMap<String, String>,
    text: String,
    html: String,
}

impl Element {
    pub(crate) fn from_element_ref(el: &ElementRef<'_>) -> Element {
        Element {
            name: el.value().name().to_string(),
            attrs: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: el.text().collect(),
            html: el.html(),
        }
    }

    /// Tag name of the matched element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Concatenated text content.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Outer HTML of the matched element.
    pub fn html(&self) -> &str {
        &self.html
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_body(body: &str) -> Response {
        let request = Request::new("http://example.com/", None).unwrap();
        Response::new(
            request,
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::copy_from_slice(body.as_bytes()),
        )
    }

    #[test]
    fn select_returns_owned_elements() {
        let res = response_with_body(
            r#"<html><body>
            <a href="/one">first</a>
            <a href="/two">second</a>
            <p>no link</p>
            </body></html>"#,
        );

        let links = res.select("a[href]").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].name(), "a");
        assert_eq!(links[0].attr("href"), Some("/one"));
        assert_eq!(links[0].text(), "first");
        assert_eq!(links[1].attr("href"), Some("/two"));
    }

    #[test]
    fn invalid_selector_is_a_parse_error() {
        let res = response_with_body("<html></html>");
        assert!(matches!(res.select("a[").unwrap_err(), Error::Parse(_)));
    }

    #[test]
    fn document_parse_is_memoized() {
        let res = response_with_body("<html><body><p>x</p></body></html>");
        let first = res.document() as *const Html;
        let second = res.document() as *const Html;
        assert_eq!(first, second);
    }
}
