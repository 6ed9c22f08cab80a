//! Configuration management for pomocache

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::StoreLayout;
use crate::catalog::Catalog;
use crate::error::{ConfigError, Result};

/// Host whose requests are treated as background images
pub const DEFAULT_IMAGE_HOST: &str = "images.unsplash.com";

/// Name of the long-lived background-image store
pub const DEFAULT_IMAGE_STORE: &str = "pomodoro-backgrounds-v1";

/// Prefix of versioned precache stores
pub const DEFAULT_PRECACHE_PREFIX: &str = "precache";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Requests to this host are served from the background-image store
    #[serde(default = "default_image_host")]
    pub image_host: String,

    /// Background-image store name
    #[serde(default = "default_image_store")]
    pub image_store: String,

    /// Build artifact precache
    #[serde(default)]
    pub precache: PrecacheConfig,

    /// Background image catalog (built-in catalog when omitted)
    #[serde(default)]
    pub catalog: Catalog,

    /// Override the durable store location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

/// Versioned precache of build artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecacheConfig {
    /// Store name prefix; the store is named `{prefix}-{version}`
    #[serde(default = "default_precache_prefix")]
    pub prefix: String,

    /// Build identifier of the current deployment
    #[serde(default = "default_precache_version")]
    pub version: String,

    /// Artifacts fetched into the precache on install
    #[serde(default)]
    pub manifest: Vec<PrecacheEntry>,
}

/// One build artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

fn default_image_host() -> String {
    DEFAULT_IMAGE_HOST.to_string()
}

fn default_image_store() -> String {
    DEFAULT_IMAGE_STORE.to_string()
}

fn default_precache_prefix() -> String {
    DEFAULT_PRECACHE_PREFIX.to_string()
}

fn default_precache_version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_precache_prefix(),
            version: default_precache_version(),
            manifest: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_host: default_image_host(),
            image_store: default_image_store(),
            precache: PrecacheConfig::default(),
            catalog: Catalog::default(),
            cache_dir: None,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".pomocache").join("config.yaml"))
    }

    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path, or the default location when `None`.
    ///
    /// An explicit path that does not exist is an error.
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(Path::new(p)),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(path, contents)?;

        // Set file permissions to 600 on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Check the store layout is usable
    pub fn validate(&self) -> Result<()> {
        if self.image_host.trim().is_empty() {
            return Err(ConfigError::Invalid("image_host must not be empty".to_string()).into());
        }
        if self.precache.prefix.is_empty() || self.precache.version.is_empty() {
            return Err(ConfigError::Invalid(
                "precache prefix and version must not be empty".to_string(),
            )
            .into());
        }
        if self.image_store == self.layout().precache_name() {
            return Err(ConfigError::Invalid(
                "image_store must differ from the precache store".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Store names derived from this configuration
    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(
            &self.precache.prefix,
            &self.precache.version,
            &self.image_store,
        )
    }
}
