//! Requests, responses, and the network fetch seam
//!
//! Everything that leaves the process goes through a [`Fetcher`]. The cache
//! controller wraps one, and the cache client loads images through one, which
//! lets tests script the network.

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpFetcher;
#[cfg(test)]
pub use mock::MockFetcher;

/// Body returned when an image cannot be served offline
pub const OFFLINE_IMAGE_BODY: &str = "Offline - image not available";

/// An outgoing request as seen by the cache controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
}

impl Request {
    /// Build a GET request, validating the URL
    pub fn get(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            method: Method::GET,
            url,
        })
    }

    /// Host of the target URL, if any
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

/// A complete response: status line, headers, and body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,

    #[serde(default)]
    pub status_text: String,

    #[serde(default)]
    pub headers: Vec<(String, String)>,

    #[serde(skip)]
    pub body: Vec<u8>,
}

impl Response {
    /// Plain response with the given status and body
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: canonical_reason(status).to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Synthetic 503 used when an image is neither stored nor reachable
    pub fn offline_image() -> Self {
        let mut response = Self::new(503, OFFLINE_IMAGE_BODY);
        response.headers.push((
            "content-type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        ));
        response
    }

    /// True for 2xx statuses
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn canonical_reason(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Something that can turn a request into a response
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request.
    ///
    /// Non-2xx statuses are returned as `Ok`; `Err` means no response at all.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
