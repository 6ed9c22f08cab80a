//! Cache client: decode cache and controller registration
//!
//! The client keeps decoded backgrounds in memory for the session and asks
//! the cache controller to persist the same images for offline use.

pub mod image_cache;
pub mod loader;
pub mod registration;

pub use image_cache::{CacheStatus, ImageCache, ImageCacheStats};
pub use loader::{DecodedImage, FetchImageLoader, ImageLoader};
pub use registration::{register_and_warm, unregister};
