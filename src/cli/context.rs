//! Command execution context
//!
//! Loads configuration, resolves the store location, and builds the
//! controller host shared by the commands that talk to the network.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use pomocache::cache::CacheStorage;
use pomocache::config::Config;
use pomocache::controller::{ControllerHost, ControllerOptions, SharedStorage};
use pomocache::error::{Error, Result};
use pomocache::network::HttpFetcher;

use crate::cli::OutputFormat;

/// Context for command execution containing config, storage, and output options
pub struct CommandContext {
    /// Loaded and validated configuration
    pub config: Config,
    /// Output format preference
    pub format: OutputFormat,
    /// Directory holding the durable stores
    pub cache_dir: PathBuf,
    storage: SharedStorage,
}

impl CommandContext {
    /// Load config and open the durable stores.
    ///
    /// The store directory comes from `--cache-dir`, then the config file,
    /// then the platform cache directory.
    pub fn new(
        format: OutputFormat,
        config_path: Option<&str>,
        cache_dir: Option<&str>,
    ) -> Result<Self> {
        let config = Config::load_at(config_path)?;
        let cache_dir = resolve_cache_dir(&config, cache_dir)?;
        log::debug!("Using store directory {}", cache_dir.display());

        let storage = CacheStorage::open_at(&cache_dir)?;

        Ok(Self {
            config,
            format,
            cache_dir,
            storage: Arc::new(Mutex::new(storage)),
        })
    }

    /// Lock the durable stores for a synchronous operation
    pub fn storage(&self) -> Result<MutexGuard<'_, CacheStorage>> {
        self.storage
            .lock()
            .map_err(|_| Error::Other("cache storage lock poisoned".to_string()))
    }

    /// Host backed by the real network
    pub fn host(&self) -> Result<Arc<ControllerHost>> {
        let network = Arc::new(HttpFetcher::new()?);
        Ok(Arc::new(ControllerHost::new(self.storage.clone(), network)))
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions::from_config(&self.config)
    }
}

/// Store directory from the flag, the config file, or the platform default
pub fn resolve_cache_dir(config: &Config, flag: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = &config.cache_dir {
        return Ok(dir.clone());
    }
    Ok(CacheStorage::cache_dir()?)
}

/// Store directory without opening the stores
pub fn cache_dir_only(config_path: Option<&str>, flag: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(Path::new(dir).to_path_buf());
    }
    let config = Config::load_at(config_path)?;
    resolve_cache_dir(&config, None)
}
