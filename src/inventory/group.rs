//! Group definition for the inventory graph.
//!
//! A `Group` holds the names of its member hosts and child groups; the
//! hosts and groups themselves are owned by the `Inventory`.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// A group of hosts in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Host names belonging to this group
    #[serde(default)]
    pub hosts: IndexSet<String>,

    /// Child group names
    #[serde(default)]
    pub children: IndexSet<String>,

    /// Parent group names
    #[serde(skip)]
    pub parents: IndexSet<String>,
}

impl Group {
    /// Create a new group with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: IndexSet::new(),
            children: IndexSet::new(),
            parents: IndexSet::new(),
        }
    }

    /// Create the special "all" group
    pub fn all() -> Self {
        Self::new(super::ALL_GROUP)
    }

    /// Create the special "ungrouped" group
    pub fn ungrouped() -> Self {
        Self::new(super::UNGROUPED_GROUP)
    }

    /// Add a host to this group
    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    /// Remove a host from this group
    pub fn remove_host(&mut self, host: &str) -> bool {
        self.hosts.shift_remove(host)
    }

    /// Check if a host belongs to this group
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Add a child group
    pub fn add_child(&mut self, child: impl Into<String>) {
        self.children.insert(child.into());
    }

    /// Remove a child group
    pub fn remove_child(&mut self, child: &str) -> bool {
        self.children.shift_remove(child)
    }

    /// Check if a group is a child of this group
    pub fn has_child(&self, child: &str) -> bool {
        self.children.contains(child)
    }

    /// Add a parent group (reverse lookup of `children`)
    pub fn add_parent(&mut self, parent: impl Into<String>) {
        self.parents.insert(parent.into());
    }

    /// Remove a parent group
    pub fn remove_parent(&mut self, parent: &str) -> bool {
        self.parents.shift_remove(parent)
    }

    /// Check if this group is empty (no hosts and no children)
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.children.is_empty()
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Group {}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} hosts", self.name, self.hosts.len())?;
        if !self.children.is_empty() {
            write!(f, ", {} children", self.children.len())?;
        }
        write!(f, ")")
    }
}
