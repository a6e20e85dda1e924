//! Turning gridscale servers into inventory hosts and groups.
//!
//! A run goes through four steps:
//! 1. [`select_servers`] applies the location and status filters
//! 2. [`HostVariables`] are built per server, templated and renamed
//! 3. [`InventoryPopulator::populate`] adds hosts, writes variables and
//!    applies the constructed rules
//! 4. [`InventoryPopulator::prune`] drops hosts outside `groups_filter`

use indexmap::IndexSet;

use super::config::InventoryConfig;
use super::constructed::ConstructedRules;
use super::{InventoryGraph, ALL_GROUP, UNGROUPED_GROUP};
use crate::error::{Error, Result};
use crate::server::ServerRecord;
use crate::template::{ExpressionEvaluator, Variables};

/// Keep servers whose location and status pass the filters.
///
/// An empty filter places no restriction; relative order is preserved.
pub fn select_servers(
    servers: Vec<ServerRecord>,
    locations_filter: &[String],
    status_filter: &[String],
) -> Vec<ServerRecord> {
    servers
        .into_iter()
        .filter(|s| locations_filter.is_empty() || locations_filter.contains(&s.location_name))
        .filter(|s| status_filter.is_empty() || status_filter.contains(&s.status))
        .collect()
}

/// Host variables of one server.
///
/// Starts out with `uuid`, `hostname`, `location`, `labels`, `status`,
/// `public_ips` and `ansible_host`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostVariables {
    vars: Variables,
    hostname: String,
}

impl HostVariables {
    /// Build the base variables of a server
    pub fn from_server(server: &ServerRecord) -> Self {
        let mut vars = Variables::new();
        vars.insert("uuid".to_string(), server.uuid.clone().into());
        vars.insert("hostname".to_string(), server.name.clone().into());
        vars.insert("location".to_string(), server.location_name.clone().into());
        vars.insert("labels".to_string(), string_list(&server.labels));
        vars.insert("status".to_string(), server.status.clone().into());
        vars.insert("public_ips".to_string(), string_list(&server.public_ip_list));
        vars.insert("ansible_host".to_string(), server.address().into());

        Self {
            vars,
            hostname: server.name.clone(),
        }
    }

    /// Render `template` as the new hostname and keep the server name under
    /// `hostname_remote`.
    ///
    /// `extra_vars` take precedence over host variables while rendering.
    pub fn apply_hostname_template(
        &mut self,
        template: &str,
        evaluator: &dyn ExpressionEvaluator,
        extra_vars: &Variables,
    ) -> Result<()> {
        let context = merge(&self.vars, extra_vars);
        let hostname = evaluator
            .render(template, &context)
            .map_err(|e| Error::expression(self.hostname.clone(), e))?;

        let remote = std::mem::replace(&mut self.hostname, hostname.clone());
        self.vars.insert("hostname".to_string(), hostname.into());
        self.vars.insert("hostname_remote".to_string(), remote.into());
        Ok(())
    }

    /// New mapping with every key except `ansible_host` renamed to
    /// `{prefix}{key}{suffix}`.
    pub fn renamed(self, prefix: &str, suffix: &str) -> Self {
        if prefix.is_empty() && suffix.is_empty() {
            return self;
        }

        let vars = self
            .vars
            .into_iter()
            .map(|(key, value)| {
                if key == "ansible_host" {
                    (key, value)
                } else {
                    (format!("{}{}{}", prefix, key, suffix), value)
                }
            })
            .collect();

        Self {
            vars,
            hostname: self.hostname,
        }
    }

    /// Inventory hostname
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Variable mapping
    pub fn vars(&self) -> &Variables {
        &self.vars
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.vars.get(key)
    }
}

fn string_list(items: &[String]) -> serde_yaml::Value {
    serde_yaml::Value::Sequence(items.iter().cloned().map(Into::into).collect())
}

// `overrides` win.
fn merge(base: &Variables, overrides: &Variables) -> Variables {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Writes hosts, variables and groups into an inventory graph.
#[derive(Debug)]
pub struct InventoryPopulator<'a> {
    config: &'a InventoryConfig,
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> InventoryPopulator<'a> {
    /// Create a populator
    pub fn new(config: &'a InventoryConfig, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { config, evaluator }
    }

    /// Build the final variables of a server
    pub fn host_variables(&self, server: &ServerRecord, extra_vars: &Variables) -> Result<HostVariables> {
        let mut vars = HostVariables::from_server(server);
        if let Some(template) = self.config.hostname_template() {
            vars.apply_hostname_template(template, self.evaluator, extra_vars)?;
        }
        Ok(vars.renamed(&self.config.hostvars_prefix, &self.config.hostvars_suffix))
    }

    /// Populate `graph` with `servers` (already selected), then prune.
    pub fn populate<G: InventoryGraph + ?Sized>(
        &self,
        servers: &[ServerRecord],
        graph: &mut G,
        extra_vars: &Variables,
    ) -> Result<()> {
        let main_group = match self.config.main_group() {
            Some(group) => graph.add_group(group),
            None => ALL_GROUP.to_string(),
        };

        let rules = ConstructedRules::new(self.config, self.evaluator);

        for server in servers {
            let host_vars = self.host_variables(server, extra_vars)?;
            let host = host_vars.hostname().to_string();

            graph.add_host(&host, Some(main_group.as_str()))?;

            for (name, value) in host_vars.vars() {
                if self.config.host_vars_filter.contains(name) {
                    graph.set_variable(&host, name, value.clone())?;
                }
            }

            rules.apply(graph, &host, host_vars.vars(), extra_vars)?;

            tracing::debug!(host = %host, server = %server.uuid, "populated host");
        }

        self.prune(graph);
        Ok(())
    }

    /// Remove hosts outside `groups_filter` and the groups not retained.
    ///
    /// Does nothing when `groups_filter` is empty. Running it twice changes
    /// nothing the second time.
    pub fn prune<G: InventoryGraph + ?Sized>(&self, graph: &mut G) {
        let groups_filter = &self.config.groups_filter;
        if groups_filter.is_empty() {
            return;
        }

        let mut removed_hosts = 0;
        for host in graph.host_names() {
            let keep = graph
                .host_groups(&host)
                .iter()
                .any(|group| groups_filter.contains(group));
            if !keep && graph.remove_host(&host) {
                removed_hosts += 1;
            }
        }

        let retained = self.retained_groups();
        let mut removed_groups = 0;
        for group in graph.group_names() {
            if !retained.contains(&group) && graph.remove_group(&group) {
                removed_groups += 1;
            }
        }

        tracing::info!(removed_hosts, removed_groups, "applied groups_filter");
    }

    /// Groups that survive pruning
    pub fn retained_groups(&self) -> IndexSet<String> {
        let mut retained: IndexSet<String> = self.config.groups_filter.iter().cloned().collect();
        retained.insert(ALL_GROUP.to_string());
        retained.insert(UNGROUPED_GROUP.to_string());
        if let Some(main_group) = self.config.main_group() {
            retained.insert(main_group.to_string());
        }
        for name in self.config.groups.keys() {
            retained.insert(name.clone());
            retained.insert(self.config.group_name(name));
        }
        retained
    }
}
