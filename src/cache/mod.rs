//! Durable response stores
//!
//! Provides SQLite-backed storage with file blob storage for large bodies,
//! plus the naming scheme that separates the versioned precache from the
//! long-lived background-image store.

pub mod key;
pub mod storage;

// Re-export main types
pub use key::{cache_key, request_key};
pub use storage::{CacheStats, CacheStorage, ClearStats, StoreStats};

/// What a store name means under a given [`StoreLayout`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreName {
    /// Build artifacts for one deployment
    Precache { version: String },
    /// External background images, kept across deployments
    ImageStore,
    /// Anything else (left over from older layouts)
    Other(String),
}

/// Names of the two stores one controller generation owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub precache_prefix: String,
    pub precache_version: String,
    pub image_store: String,
}

impl StoreLayout {
    pub fn new(
        precache_prefix: impl Into<String>,
        precache_version: impl Into<String>,
        image_store: impl Into<String>,
    ) -> Self {
        Self {
            precache_prefix: precache_prefix.into(),
            precache_version: precache_version.into(),
            image_store: image_store.into(),
        }
    }

    /// Name of the current precache store: `{prefix}-{version}`
    pub fn precache_name(&self) -> String {
        format!("{}-{}", self.precache_prefix, self.precache_version)
    }

    /// Classify a raw store name
    pub fn classify(&self, name: &str) -> StoreName {
        if name == self.image_store {
            return StoreName::ImageStore;
        }
        match name
            .strip_prefix(self.precache_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
        {
            Some(version) if !version.is_empty() => StoreName::Precache {
                version: version.to_string(),
            },
            _ => StoreName::Other(name.to_string()),
        }
    }

    /// Whether activation cleanup keeps this store.
    ///
    /// Only the current precache version and the image store survive.
    pub fn should_retain(&self, name: &str) -> bool {
        match self.classify(name) {
            StoreName::ImageStore => true,
            StoreName::Precache { version } => version == self.precache_version,
            StoreName::Other(_) => false,
        }
    }
}
