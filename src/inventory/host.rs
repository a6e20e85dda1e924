//! Host definition for the inventory graph.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// A managed host in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Inventory hostname
    pub name: String,

    /// Host-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,

    /// Groups this host belongs to
    #[serde(skip)]
    pub groups: IndexSet<String>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: IndexMap::new(),
            groups: IndexSet::new(),
        }
    }

    /// Address to connect to: `ansible_host` when set, else the name
    pub fn address(&self) -> &str {
        self.vars
            .get("ansible_host")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or(&self.name)
    }

    /// Set a variable on this host
    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this host
    pub fn get_var(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.vars.get(key)
    }

    /// Check if host has a specific variable
    pub fn has_var(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Add this host to a group
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    /// Remove this host from a group
    pub fn remove_from_group(&mut self, group: &str) -> bool {
        self.groups.shift_remove(group)
    }

    /// Check if host belongs to a specific group
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Whether the host belongs to nothing but the implicit groups
    pub fn is_ungrouped(&self) -> bool {
        self.groups
            .iter()
            .all(|g| g == super::ALL_GROUP || g == super::UNGROUPED_GROUP)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.address() == self.name {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.address())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_uses_ansible_host() {
        let mut host = Host::new("node1");
        assert_eq!(host.address(), "node1");

        host.set_var("ansible_host", "1.2.3.4".into());
        assert_eq!(host.address(), "1.2.3.4");
        assert_eq!(host.to_string(), "node1 (1.2.3.4)");
    }

    #[test]
    fn test_group_membership() {
        let mut host = Host::new("node1");
        host.add_to_group("all");
        assert!(host.is_ungrouped());

        host.add_to_group("gridscale");
        assert!(host.in_group("gridscale"));
        assert!(!host.is_ungrouped());

        assert!(host.remove_from_group("gridscale"));
        assert!(!host.remove_from_group("gridscale"));
        assert!(host.is_ungrouped());
    }
}
