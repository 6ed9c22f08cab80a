//! Image loading for the decode cache

use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};

use crate::error::LoadError;
use crate::network::{Fetcher, Request};

/// A fully decoded background image
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub url: String,
    pub image: DynamicImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.image.dimensions().1
    }
}

/// Fetch-and-decode seam used by [`super::ImageCache`]
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<DecodedImage, LoadError>;
}

/// Loads images through a [`Fetcher`] and decodes them with the `image` crate.
///
/// Hand it the controller host to have every load intercepted by the active
/// cache controller.
pub struct FetchImageLoader {
    fetcher: Arc<dyn Fetcher>,
}

impl FetchImageLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ImageLoader for FetchImageLoader {
    async fn load(&self, url: &str) -> Result<DecodedImage, LoadError> {
        let request = Request::get(url).map_err(|e| LoadError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| LoadError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.ok() {
            return Err(LoadError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        // Decoding is CPU-bound; keep it off the async workers
        let body = response.body;
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&body))
            .await
            .map_err(|e| LoadError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| LoadError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(DecodedImage {
            url: url.to_string(),
            image: decoded,
        })
    }
}
