//! reqwest-backed fetcher

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::{Fetcher, Request, Response};
use crate::error::FetchError;

/// Fetcher that talks to the real network.
///
/// No request timeout is configured: a hung fetch stays pending, which callers
/// that deduplicate loads must tolerate.
#[derive(Clone)]
pub struct HttpFetcher {
    http: HttpClient,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher
    pub fn new() -> Result<Self, FetchError> {
        let http = HttpClient::builder()
            .user_agent(concat!("pomocache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        log::debug!("{} {}", request.method, request.url);

        let response = self
            .http
            .request(request.method.clone(), request.url.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}
