//! # gridscale-inventory
//!
//! Dynamic inventory for virtual servers on the gridscale cloud. Given API
//! credentials and a `*.gs_inventory.yml` source file, it turns the server
//! list into hosts and groups of an inventory graph, annotated with host
//! variables.
//!
//! ## Architecture Overview
//!
//! ```text
//!   *.gs_inventory.yml ──► InventoryConfig
//!                               │
//!   ServerSource ──► resolve_servers (ServerCache) ──► select_servers
//!                                                          │
//!                                                          ▼
//!                     ExpressionEvaluator ◄── InventoryPopulator
//!                                                          │
//!                                                          ▼
//!                                                  InventoryGraph
//! ```
//!
//! The HTTP client for the gridscale API is not part of this crate. Anything
//! that can produce [`server::ServerRecord`]s plugs in as a
//! [`server::ServerSource`]; [`server::JsonServerSource`] decodes the raw
//! API response body.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use gridscale_inventory::prelude::*;
//!
//! let config = InventoryConfig::builder()
//!     .locations(["de/fra"])
//!     .main_group("gridscale")
//!     .group("control_plane", "'master' in hostname")
//!     .build()?;
//!
//! let servers = JsonServerSource::from_file(Path::new("servers.json"))?.fetch_servers()?;
//! let servers = select_servers(servers, &config.locations_filter, &config.status_filter);
//!
//! let evaluator = JinjaEvaluator::new();
//! let mut inventory = Inventory::new();
//! InventoryPopulator::new(&config, &evaluator).populate(&servers, &mut inventory, &Variables::new())?;
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, Result};

    // Inventory
    pub use crate::inventory::{
        cache_key, resolve_servers, select_servers, verify_file, GridscaleInventoryPlugin, Group,
        Host, HostVariables, Inventory, InventoryConfig, InventoryGraph, InventoryPopulator,
        JsonFileCache, KeyedGroupConfig, MemoryServerCache, ServerCache,
    };

    // Servers
    pub use crate::server::{JsonServerSource, ServerRecord, ServerSource, StaticServerSource};

    // Templating
    pub use crate::template::{ExpressionEvaluator, JinjaEvaluator, Variables};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
///
/// Failures are reported as configuration, expression or source errors; see
/// [`Error`](error::Error).
pub mod error;

/// Expression evaluation for templates, compose and conditionals.
pub mod template;

/// Server records and the sources that yield them.
pub mod server;

/// Inventory graph, configuration, caching and population.
pub mod inventory;

pub use error::{Error, Result};
