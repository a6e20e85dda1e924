//! End-to-end tests for the gs_inventory plugin
//!
//! Covers inventory source verification, credential resolution, server
//! caching (read, refresh, expiry) and source failures.

mod common;

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use common::*;
use gridscale_inventory::prelude::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const SOURCE: &str = r#"
plugin: bitnik.gridscale.gs_inventory
api_token: test-token
user_uuid: 00000000-0000-0000-0000-000000000000
locations_filter: [de/fra, de/ber]
main_group: gridscale
keyed_groups:
  - key: location
    prefix: loc
"#;

/// Counts `fetch_servers` calls; cache hits leave the count alone.
#[derive(Debug)]
struct CountingSource {
    inner: JsonServerSource,
    fetches: Rc<Cell<usize>>,
}

impl ServerSource for CountingSource {
    fn fetch_servers(&self) -> Result<Vec<ServerRecord>> {
        self.fetches.set(self.fetches.get() + 1);
        self.inner.fetch_servers()
    }
}

fn counting_plugin(fetches: Rc<Cell<usize>>) -> GridscaleInventoryPlugin {
    GridscaleInventoryPlugin::new(move |credentials| {
        assert_eq!(credentials.api_token, "test-token");
        let source = CountingSource {
            inner: JsonServerSource::from_file(&fixture_path("servers.json"))?,
            fetches: fetches.clone(),
        };
        Ok(Box::new(source) as Box<dyn ServerSource>)
    })
}

fn cached_source(dir: &TempDir, timeout: u64) -> std::path::PathBuf {
    let cache_dir = dir.path().join("cache");
    let yaml = format!(
        "{}cache: true\ncache_timeout: {}\ncache_connection: {}\n",
        SOURCE,
        timeout,
        cache_dir.display()
    );
    write_source(dir, "prod.gs_inventory.yml", &yaml)
}

#[test]
fn test_parse_populates_inventory() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "prod.gs_inventory.yml", SOURCE);
    let fetches = Rc::new(Cell::new(0));
    let mut plugin = counting_plugin(fetches.clone());

    let mut inventory = Inventory::new();
    plugin.parse(&mut inventory, &path, true).unwrap();

    assert_eq!(
        host_names(&inventory),
        vec!["k8s-master-1", "k8s-worker-1", "db-1"]
    );
    assert_eq!(
        inventory.host_groups("db-1"),
        vec!["all", "gridscale", "loc_de/ber"]
    );
    assert_eq!(fetches.get(), 1);
}

#[test]
fn test_parse_rejects_unknown_file_name() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "inventory.yml", SOURCE);
    let fetches = Rc::new(Cell::new(0));
    let mut plugin = counting_plugin(fetches.clone());

    let err = plugin.parse(&mut Inventory::new(), &path, true).unwrap_err();
    assert!(matches!(err, Error::UnsupportedSource { .. }));
    assert!(err.is_configuration());
    assert_eq!(fetches.get(), 0);
}

#[test]
fn test_parse_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let path = write_source(
        &dir,
        "bad.gs_inventory.yml",
        "plugin: bitnik.gridscale.gs_inventory\nkeyed_groups:\n  - key: location\n    default_value: x\n    trailing_separator: false\n",
    );
    let fetches = Rc::new(Cell::new(0));
    let mut plugin = counting_plugin(fetches.clone());

    let mut inventory = Inventory::new();
    let err = plugin.parse(&mut inventory, &path, true).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(inventory.host_count(), 0);
    assert_eq!(fetches.get(), 0);
}

#[test]
fn test_source_failure_leaves_inventory_untouched() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "prod.gs_inventory.yml", SOURCE);
    let mut plugin = GridscaleInventoryPlugin::new(|_| {
        Ok(Box::new(JsonServerSource::from_body("401 Unauthorized")) as Box<dyn ServerSource>)
    });

    let mut inventory = Inventory::new();
    let err = plugin.parse(&mut inventory, &path, true).unwrap_err();
    assert!(matches!(err, Error::Source(_)));
    assert_eq!(inventory.host_count(), 0);
    assert_eq!(inventory.group_count(), 2);
}

#[test]
fn test_file_cache_is_read_then_refreshed() {
    let dir = TempDir::new().unwrap();
    let path = cached_source(&dir, 3600);
    let fetches = Rc::new(Cell::new(0));
    let mut plugin = counting_plugin(fetches.clone());

    plugin.parse(&mut Inventory::new(), &path, true).unwrap();
    assert_eq!(fetches.get(), 1);

    // cached list is used
    let mut inventory = Inventory::new();
    plugin.parse(&mut inventory, &path, true).unwrap();
    assert_eq!(fetches.get(), 1);
    assert_eq!(inventory.host_count(), 3);

    // refresh bypasses and rewrites the cache
    plugin.parse(&mut Inventory::new(), &path, false).unwrap();
    assert_eq!(fetches.get(), 2);

    let key = cache_key(&path.to_string_lossy());
    let mut cache = JsonFileCache::new(dir.path().join("cache"), Duration::ZERO);
    let cached = cache.get(&key).unwrap().unwrap();
    // the whole server list is cached, before location filtering
    assert_eq!(cached.len(), 4);
}

#[test]
fn test_expired_file_cache_is_refetched() {
    let dir = TempDir::new().unwrap();
    let path = cached_source(&dir, 60);
    let fetches = Rc::new(Cell::new(0));
    let mut plugin = counting_plugin(fetches.clone());

    plugin.parse(&mut Inventory::new(), &path, true).unwrap();

    let key = cache_key(&path.to_string_lossy());
    let entry = std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert!(entry.to_string_lossy().ends_with(".json"));
    let old = SystemTime::now() - Duration::from_secs(3600);
    filetime::set_file_mtime(&entry, filetime::FileTime::from_system_time(old)).unwrap();

    plugin.parse(&mut Inventory::new(), &path, true).unwrap();
    assert_eq!(fetches.get(), 2);
    assert!(JsonFileCache::new(dir.path().join("cache"), Duration::ZERO)
        .get(&key)
        .unwrap()
        .is_some());
}

#[test]
fn test_caching_disabled_always_fetches() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "prod.gs_inventory.yml", SOURCE);
    let fetches = Rc::new(Cell::new(0));
    let mut plugin = counting_plugin(fetches.clone());

    plugin.parse(&mut Inventory::new(), &path, true).unwrap();
    plugin.parse(&mut Inventory::new(), &path, true).unwrap();
    assert_eq!(fetches.get(), 2);
}

#[test]
fn test_memory_cache_without_connection() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "prod.gs_inventory.yml", &format!("{}cache: true\n", SOURCE));
    let fetches = Rc::new(Cell::new(0));
    let mut plugin = counting_plugin(fetches.clone());

    plugin.parse(&mut Inventory::new(), &path, true).unwrap();
    plugin.parse(&mut Inventory::new(), &path, true).unwrap();
    assert_eq!(fetches.get(), 1);
}

#[test]
fn test_extra_vars_reach_hostname_template() {
    let dir = TempDir::new().unwrap();
    let path = write_source(
        &dir,
        "prod.gs_inventory.yml",
        &format!("{}hostname_template: \"{{{{ env }}}}-{{{{ hostname }}}}\"\n", SOURCE),
    );
    let mut extra = Variables::new();
    extra.insert("env".to_string(), "prod".into());
    let mut plugin = counting_plugin(Rc::new(Cell::new(0))).with_extra_vars(extra);

    let mut inventory = Inventory::new();
    plugin.parse(&mut inventory, &path, true).unwrap();
    assert!(inventory.get_host("prod-db-1").is_some());
}

#[test]
fn test_verify_file_requires_existing_source() {
    assert!(!verify_file(Path::new("/nonexistent/prod.gs_inventory.yml")));
}
