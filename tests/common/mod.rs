//! Shared test utilities and fixtures for the integration tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::path::PathBuf;

use gridscale_inventory::prelude::*;
use tempfile::TempDir;

/// Get the path to the test fixtures directory.
pub fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Get the path to a fixture file.
pub fn fixture_path(relative_path: &str) -> PathBuf {
    fixtures_path().join(relative_path)
}

/// Servers from `tests/fixtures/servers.json`, in document order.
pub fn fixture_servers() -> Vec<ServerRecord> {
    JsonServerSource::from_file(&fixture_path("servers.json"))
        .and_then(|source| source.fetch_servers())
        .unwrap()
}

/// A single `de/fra` server with one public IP.
pub fn node1() -> ServerRecord {
    ServerRecord::new("u-node1", "node1", "de/fra", "active").with_public_ip("1.2.3.4")
}

/// Select and populate a fresh inventory the way a plugin run does.
pub fn populate(config: &InventoryConfig, servers: Vec<ServerRecord>) -> Result<Inventory> {
    let servers = select_servers(servers, &config.locations_filter, &config.status_filter);
    let evaluator = JinjaEvaluator::new();
    let mut inventory = Inventory::new();
    InventoryPopulator::new(config, &evaluator).populate(&servers, &mut inventory, &Variables::new())?;
    Ok(inventory)
}

/// Write an inventory source file into `dir` and return its path.
pub fn write_source(dir: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, yaml).unwrap();
    path
}

/// Host names of an inventory, in insertion order.
pub fn host_names(inventory: &Inventory) -> Vec<String> {
    inventory.host_names()
}

/// Route library logs to the test output; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
