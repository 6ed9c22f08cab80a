//! Scripted fetcher for tests
//!
//! Routes are keyed by full URL. Unrouted URLs fail with a network error, so a
//! test only has to script what it expects to succeed.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Fetcher, Request, Response};
use crate::error::FetchError;

#[derive(Clone)]
enum MockRoute {
    Respond(Response),
    Fail(FetchError),
}

/// Mock network for unit tests.
///
/// # Example
/// ```ignore
/// let fetcher = MockFetcher::new()
///     .with_response("https://images.unsplash.com/x", 200, png_bytes())
///     .with_status("https://images.unsplash.com/y", 404);
/// ```
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, MockRoute>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `url` with `status` and `body`
    pub fn with_response(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.set_response(url, status, body);
        self
    }

    /// Respond to `url` with an empty body and the given status
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.with_response(url, status, Vec::new())
    }

    /// Fail `url` with a network error
    pub fn with_failure(self, url: &str) -> Self {
        self.set_failure(url);
        self
    }

    /// Sleep before every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the route for `url` after construction
    pub fn set_response(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            MockRoute::Respond(Response::new(status, body)),
        );
    }

    /// Make `url` fail after construction (simulates going offline)
    pub fn set_failure(&self, url: &str) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            MockRoute::Fail(FetchError::Network("connection refused".to_string())),
        );
    }

    /// Number of fetches seen for `url`
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Number of fetches seen in total
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url.as_str().to_string();
        *self.calls.lock().unwrap().entry(url.clone()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let route = self.routes.lock().unwrap().get(&url).cloned();
        match route {
            Some(MockRoute::Respond(response)) => Ok(response),
            Some(MockRoute::Fail(err)) => Err(err),
            None => Err(FetchError::Network(format!("no route for {url}"))),
        }
    }
}

/// A tiny valid PNG, for exercising the image decoder
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(3, 2, image::Rgb([200, 80, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
