//! The `gs_inventory` plugin entry point.
//!
//! [`GridscaleInventoryPlugin::parse`] ties the pieces together for one
//! inventory source file: read and validate the configuration, resolve
//! credentials, fetch (or load cached) servers, select and populate.
//!
//! ```rust,ignore
//! use gridscale_inventory::prelude::*;
//!
//! let mut plugin = GridscaleInventoryPlugin::new(|_credentials| {
//!     Ok(Box::new(JsonServerSource::from_file(Path::new("servers.json"))?) as Box<dyn ServerSource>)
//! });
//! let mut inventory = Inventory::new();
//! plugin.parse(&mut inventory, Path::new("prod.gs_inventory.yml"), true)?;
//! println!("{}", serde_json::to_string_pretty(&inventory.to_json()?)?);
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use super::cache::{cache_key, resolve_servers, JsonFileCache, MemoryServerCache, ServerCache};
use super::config::{Credentials, InventoryConfig};
use super::populator::{select_servers, InventoryPopulator};
use super::InventoryGraph;
use crate::error::{Error, Result};
use crate::server::ServerSource;
use crate::template::{ExpressionEvaluator, JinjaEvaluator, Variables};

/// File name endings accepted as inventory sources
pub const SOURCE_SUFFIXES: [&str; 2] = ["gs_inventory.yaml", "gs_inventory.yml"];

/// Whether `path` is a readable gs_inventory source file.
pub fn verify_file(path: &Path) -> bool {
    let name_matches = path
        .to_str()
        .is_some_and(|p| SOURCE_SUFFIXES.iter().any(|suffix| p.ends_with(suffix)));

    name_matches && path.is_file() && std::fs::File::open(path).is_ok()
}

/// Builds a server source from resolved credentials.
pub type SourceFactory = Box<dyn Fn(&Credentials) -> Result<Box<dyn ServerSource>>>;

/// Dynamic inventory plugin for gridscale.
pub struct GridscaleInventoryPlugin {
    source_factory: SourceFactory,
    evaluator: Box<dyn ExpressionEvaluator>,
    memory_cache: MemoryServerCache,
    extra_vars: Variables,
}

impl GridscaleInventoryPlugin {
    /// Create a plugin; `source_factory` is called once per parse.
    pub fn new<F>(source_factory: F) -> Self
    where
        F: Fn(&Credentials) -> Result<Box<dyn ServerSource>> + 'static,
    {
        Self {
            source_factory: Box::new(source_factory),
            evaluator: Box::new(JinjaEvaluator::new()),
            memory_cache: MemoryServerCache::new(),
            extra_vars: Variables::new(),
        }
    }

    /// Use a different expression evaluator
    pub fn with_evaluator(mut self, evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Set run-level extra variables
    pub fn with_extra_vars(mut self, extra_vars: Variables) -> Self {
        self.extra_vars = extra_vars;
        self
    }

    /// Populate `graph` from the inventory source at `path`.
    ///
    /// `use_cache` is false when the caller wants the cache refreshed.
    pub fn parse<G: InventoryGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        path: &Path,
        use_cache: bool,
    ) -> Result<()> {
        if !verify_file(path) {
            return Err(Error::UnsupportedSource {
                path: path.to_path_buf(),
            });
        }

        let config = InventoryConfig::from_file(path)?;
        let credentials = config.credentials()?;
        let source = (self.source_factory)(&credentials)?;

        let key = cache_key(&path.to_string_lossy());
        let servers = match &config.cache_connection {
            Some(dir) => {
                let mut cache = JsonFileCache::new(dir, Duration::from_secs(config.cache_timeout));
                resolve_servers(source.as_ref(), &mut cache, &key, config.cache, use_cache)?
            }
            None => {
                let cache: &mut dyn ServerCache = &mut self.memory_cache;
                resolve_servers(source.as_ref(), cache, &key, config.cache, use_cache)?
            }
        };

        let fetched = servers.len();
        let selected = select_servers(servers, &config.locations_filter, &config.status_filter);
        tracing::info!(
            source = %path.display(),
            fetched,
            selected = selected.len(),
            "populating gridscale inventory"
        );

        InventoryPopulator::new(&config, self.evaluator.as_ref()).populate(
            &selected,
            graph,
            &self.extra_vars,
        )
    }
}

impl fmt::Debug for GridscaleInventoryPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridscaleInventoryPlugin")
            .field("evaluator", &self.evaluator)
            .field("memory_cache", &self.memory_cache)
            .field("extra_vars", &self.extra_vars)
            .finish_non_exhaustive()
    }
}
