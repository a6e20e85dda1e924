//! Inventory graph and population.
//!
//! This module provides:
//! - The [`InventoryGraph`] trait the populator mutates
//! - An in-memory [`Inventory`] implementing it, with the implicit `all` and
//!   `ungrouped` groups and an Ansible-compatible JSON export
//! - Configuration, server caching, the populator and the plugin entry point

pub mod cache;
pub mod config;
pub mod constructed;
pub mod group;
pub mod host;
pub mod plugin;
pub mod populator;

pub use cache::{cache_key, resolve_servers, JsonFileCache, MemoryServerCache, ServerCache};
pub use constructed::{sanitize_group_name, ConstructedRules, KeyedGroupMatch};
pub use config::{Credentials, InventoryConfig, InventoryConfigBuilder, KeyedGroupConfig};
pub use group::Group;
pub use host::Host;
pub use plugin::{verify_file, GridscaleInventoryPlugin};
pub use populator::{select_servers, HostVariables, InventoryPopulator};

use indexmap::IndexMap;
use thiserror::Error;

/// Name of the group every host belongs to
pub const ALL_GROUP: &str = "all";

/// Name of the group holding hosts that belong to no other group
pub const UNGROUPED_GROUP: &str = "ungrouped";

/// Errors raised by inventory graph mutations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("group '{0}' cannot be a child of itself")]
    SelfParent(String),

    #[error("JSON conversion error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// A mutable graph of hosts and groups with variables.
///
/// Hosts always belong to `all`. Adding a host to a group that does not exist
/// is an error; `add_group` is idempotent.
pub trait InventoryGraph {
    /// Create a group if missing and return its name
    fn add_group(&mut self, name: &str) -> String;

    /// Create a host if missing and add it to `group` (`all` when `None`)
    fn add_host(&mut self, name: &str, group: Option<&str>) -> InventoryResult<()>;

    /// Set a host variable
    fn set_variable(
        &mut self,
        host: &str,
        key: &str,
        value: serde_yaml::Value,
    ) -> InventoryResult<()>;

    /// Make `child` a child group of `parent`
    fn add_child_group(&mut self, parent: &str, child: &str) -> InventoryResult<()>;

    /// Remove a host and detach it from all its groups
    fn remove_host(&mut self, name: &str) -> bool;

    /// Remove a group and detach it from its hosts and relatives
    fn remove_group(&mut self, name: &str) -> bool;

    /// All host names
    fn host_names(&self) -> Vec<String>;

    /// All group names
    fn group_names(&self) -> Vec<String>;

    /// Groups a host directly belongs to
    fn host_groups(&self, host: &str) -> Vec<String>;
}

/// In-memory inventory holding all hosts and groups
#[derive(Debug, Clone)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Create a new empty inventory with the default groups
    pub fn new() -> Self {
        let mut groups = IndexMap::new();
        groups.insert(ALL_GROUP.to_string(), Group::all());
        groups.insert(UNGROUPED_GROUP.to_string(), Group::ungrouped());

        Self {
            hosts: IndexMap::new(),
            groups,
        }
    }

    /// Get a host by name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Get a group by name
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Get all hosts
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Get all groups
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Count total hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Count total groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    // Keep `ungrouped` in sync with a host's other memberships.
    fn reconcile_ungrouped(&mut self, host_name: &str) {
        let Some(host) = self.hosts.get_mut(host_name) else {
            return;
        };

        if host.is_ungrouped() {
            host.add_to_group(UNGROUPED_GROUP);
            if let Some(ungrouped) = self.groups.get_mut(UNGROUPED_GROUP) {
                ungrouped.add_host(host_name);
            }
        } else if host.remove_from_group(UNGROUPED_GROUP) {
            if let Some(ungrouped) = self.groups.get_mut(UNGROUPED_GROUP) {
                ungrouped.remove_host(host_name);
            }
        }
    }

    /// Export in the dynamic inventory `--list` JSON shape
    pub fn to_json(&self) -> InventoryResult<serde_json::Value> {
        let mut root = serde_json::Map::new();

        let mut hostvars = serde_json::Map::new();
        for host in self.hosts.values() {
            hostvars.insert(host.name.clone(), serde_json::to_value(&host.vars)?);
        }
        let mut meta = serde_json::Map::new();
        meta.insert("hostvars".to_string(), serde_json::Value::Object(hostvars));
        root.insert("_meta".to_string(), serde_json::Value::Object(meta));

        for group in self.groups.values() {
            let mut entry = serde_json::Map::new();

            // `all` lists top-level groups instead of hosts.
            let (hosts, children): (Vec<&String>, Vec<&String>) = if group.name == ALL_GROUP {
                let top_level = self
                    .groups
                    .values()
                    .filter(|g| {
                        g.name != ALL_GROUP && (g.parents.is_empty() || g.parents.contains(ALL_GROUP))
                    })
                    .map(|g| &g.name)
                    .collect();
                (Vec::new(), top_level)
            } else {
                (group.hosts.iter().collect(), group.children.iter().collect())
            };

            if !hosts.is_empty() {
                entry.insert("hosts".to_string(), serde_json::to_value(hosts)?);
            }
            if !children.is_empty() {
                entry.insert("children".to_string(), serde_json::to_value(children)?);
            }

            root.insert(group.name.clone(), serde_json::Value::Object(entry));
        }

        Ok(serde_json::Value::Object(root))
    }
}

impl InventoryGraph for Inventory {
    fn add_group(&mut self, name: &str) -> String {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name));
        name.to_string()
    }

    fn add_host(&mut self, name: &str, group: Option<&str>) -> InventoryResult<()> {
        let group = group.unwrap_or(ALL_GROUP);
        if !self.groups.contains_key(group) {
            return Err(InventoryError::GroupNotFound(group.to_string()));
        }

        let host = self
            .hosts
            .entry(name.to_string())
            .or_insert_with(|| Host::new(name));
        host.add_to_group(ALL_GROUP);
        host.add_to_group(group);

        for group_name in [ALL_GROUP, group] {
            if let Some(g) = self.groups.get_mut(group_name) {
                g.add_host(name);
            }
        }

        self.reconcile_ungrouped(name);
        Ok(())
    }

    fn set_variable(
        &mut self,
        host: &str,
        key: &str,
        value: serde_yaml::Value,
    ) -> InventoryResult<()> {
        self.hosts
            .get_mut(host)
            .ok_or_else(|| InventoryError::HostNotFound(host.to_string()))?
            .set_var(key, value);
        Ok(())
    }

    fn add_child_group(&mut self, parent: &str, child: &str) -> InventoryResult<()> {
        if parent == child {
            return Err(InventoryError::SelfParent(child.to_string()));
        }
        for name in [parent, child] {
            if !self.groups.contains_key(name) {
                return Err(InventoryError::GroupNotFound(name.to_string()));
            }
        }

        if let Some(g) = self.groups.get_mut(parent) {
            g.add_child(child);
        }
        if let Some(g) = self.groups.get_mut(child) {
            g.add_parent(parent);
        }
        Ok(())
    }

    fn remove_host(&mut self, name: &str) -> bool {
        let Some(host) = self.hosts.shift_remove(name) else {
            return false;
        };

        for group_name in &host.groups {
            if let Some(group) = self.groups.get_mut(group_name) {
                group.remove_host(name);
            }
        }
        true
    }

    fn remove_group(&mut self, name: &str) -> bool {
        if name == ALL_GROUP {
            return false;
        }
        let Some(group) = self.groups.shift_remove(name) else {
            return false;
        };

        for parent in &group.parents {
            if let Some(p) = self.groups.get_mut(parent) {
                p.remove_child(name);
            }
        }
        for child in &group.children {
            if let Some(c) = self.groups.get_mut(child) {
                c.remove_parent(name);
            }
        }
        for host_name in &group.hosts {
            if let Some(host) = self.hosts.get_mut(host_name) {
                host.remove_from_group(name);
            }
        }
        if name != UNGROUPED_GROUP {
            for host_name in &group.hosts {
                self.reconcile_ungrouped(host_name);
            }
        }
        true
    }

    fn host_names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    fn host_groups(&self, host: &str) -> Vec<String> {
        self.hosts
            .get(host)
            .map(|h| h.groups.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Inventory ({} hosts, {} groups)", self.hosts.len(), self.groups.len())?;

        for group in self.groups.values() {
            if group.is_empty() {
                continue;
            }
            writeln!(f, "  [{}]", group.name)?;
            for host_name in &group.hosts {
                if let Some(host) = self.hosts.get(host_name) {
                    writeln!(f, "    {}", host)?;
                }
            }
        }

        Ok(())
    }
}
