//! Constructed variables and groups.
//!
//! Applies the `compose`, `groups` and `keyed_groups` options to one host:
//!
//! ```yaml
//! compose:
//!   ansible_user: "'root'"
//! groups:
//!   control_plane: "'master' in hostname"
//! keyed_groups:
//!   - key: location
//!     prefix: loc
//!     parent_group: locations
//!   - key: labels
//!     prefix: label
//! ```
//!
//! In strict mode any evaluation failure aborts the run. Otherwise the failing
//! entry is skipped with a warning and the remaining entries still apply.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use super::config::{InventoryConfig, KeyedGroupConfig};
use super::{InventoryGraph, ALL_GROUP, UNGROUPED_GROUP};
use crate::error::{Error, Result};
use crate::template::{ExpressionError, ExpressionEvaluator, Variables};

static INVALID_GROUP_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("Invalid group name regex"));

/// Replace every character that is not valid in a group name with `_`.
pub fn sanitize_group_name(name: &str) -> String {
    INVALID_GROUP_CHARS.replace_all(name, "_").into_owned()
}

/// A group derived from a keyed group entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedGroupMatch {
    /// Group name
    pub name: String,
    /// Parent group name, if configured
    pub parent: Option<String>,
}

/// Evaluates constructed rules for hosts.
#[derive(Debug)]
pub struct ConstructedRules<'a> {
    config: &'a InventoryConfig,
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> ConstructedRules<'a> {
    /// Create rules from a configuration and an evaluator
    pub fn new(config: &'a InventoryConfig, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { config, evaluator }
    }

    /// Apply compose, conditional groups and keyed groups to `host`.
    ///
    /// Composed variables are visible to the group expressions that follow,
    /// together with `inventory_hostname`, `inventory_hostname_short` and
    /// `group_names`. With `use_extra_vars`, `extra_vars` override host
    /// variables in compose expressions and keyed group keys.
    pub fn apply<G: InventoryGraph + ?Sized>(
        &self,
        graph: &mut G,
        host: &str,
        vars: &Variables,
        extra_vars: &Variables,
    ) -> Result<()> {
        let compose_vars = self.with_extra_vars(vars.clone(), extra_vars);
        let composed = self.evaluate_compose(host, &compose_vars)?;

        let mut host_vars = vars.clone();
        for (name, value) in composed {
            graph.set_variable(host, &name, value.clone())?;
            host_vars.insert(name, value);
        }

        let context = with_magic_vars(host_vars.clone(), &*graph, host);
        for group in self.evaluate_conditional_groups(host, &context)? {
            let group = graph.add_group(&group);
            graph.add_host(host, Some(group.as_str()))?;
        }

        // Memberships from earlier entries show up in `group_names`.
        for keyed in &self.config.keyed_groups {
            let context = self.with_extra_vars(
                with_magic_vars(host_vars.clone(), &*graph, host),
                extra_vars,
            );
            for matched in self.evaluate_keyed_group(host, keyed, &context)? {
                let group = graph.add_group(&matched.name);
                graph.add_host(host, Some(group.as_str()))?;
                if let Some(parent) = matched.parent {
                    let parent = graph.add_group(&parent);
                    graph.add_child_group(&parent, &group)?;
                }
            }
        }

        Ok(())
    }

    /// Evaluate compose expressions for a host
    pub fn evaluate_compose(
        &self,
        host: &str,
        vars: &Variables,
    ) -> Result<IndexMap<String, serde_yaml::Value>> {
        let mut results = IndexMap::new();

        for (var_name, expr) in &self.config.compose {
            let value = self.evaluator.evaluate(expr, vars);
            if let Some(value) = self.tolerate(host, var_name, value)? {
                results.insert(var_name.clone(), value);
            }
        }

        Ok(results)
    }

    /// Evaluate conditional groups for a host, returning the groups it joins
    pub fn evaluate_conditional_groups(&self, host: &str, vars: &Variables) -> Result<Vec<String>> {
        let mut groups = Vec::new();

        for (group_name, expr) in &self.config.groups {
            let matched = self.evaluator.evaluate_bool(expr, vars);
            if let Some(true) = self.tolerate(host, group_name, matched)? {
                groups.push(self.config.group_name(group_name));
            }
        }

        Ok(groups)
    }

    /// Evaluate every keyed group for a host against the same variables
    pub fn evaluate_keyed_groups(
        &self,
        host: &str,
        vars: &Variables,
    ) -> Result<Vec<KeyedGroupMatch>> {
        let mut groups = Vec::new();
        for keyed in &self.config.keyed_groups {
            groups.extend(self.evaluate_keyed_group(host, keyed, vars)?);
        }
        Ok(groups)
    }

    /// Evaluate one keyed group entry for a host
    pub fn evaluate_keyed_group(
        &self,
        host: &str,
        keyed: &KeyedGroupConfig,
        vars: &Variables,
    ) -> Result<Vec<KeyedGroupMatch>> {
        let names = self.keyed_group_names(keyed, vars);
        let Some(names) = self.tolerate(host, &keyed.key, names)? else {
            return Ok(Vec::new());
        };
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let parent = match &keyed.parent_group {
            Some(raw) => {
                let rendered = self.evaluator.render(raw, vars);
                match self.tolerate(host, raw, rendered)? {
                    Some(parent) => Some(self.config.group_name(&parent)),
                    None => return Ok(Vec::new()),
                }
            }
            None => None,
        };

        Ok(names
            .into_iter()
            .map(|name| KeyedGroupMatch {
                name,
                parent: parent.clone(),
            })
            .collect())
    }

    fn with_extra_vars(&self, mut vars: Variables, extra_vars: &Variables) -> Variables {
        if self.config.use_extra_vars {
            for (key, value) in extra_vars {
                vars.insert(key.clone(), value.clone());
            }
        }
        vars
    }

    // Group names for one keyed group entry; an empty Vec means "skip".
    fn keyed_group_names(
        &self,
        keyed: &KeyedGroupConfig,
        vars: &Variables,
    ) -> std::result::Result<Vec<String>, ExpressionError> {
        let key = self.evaluator.evaluate(&keyed.key, vars)?;
        let default = keyed.default_value.as_deref();

        let use_default = matches!(&key, serde_yaml::Value::String(s) if s.is_empty()) && default.is_some();
        if !is_truthy(&key) && !use_default {
            let empty_collection = matches!(
                &key,
                serde_yaml::Value::Sequence(s) if s.is_empty()
            ) || matches!(&key, serde_yaml::Value::Mapping(m) if m.is_empty());

            if self.config.strict && !empty_collection {
                return Err(ExpressionError::new(
                    &keyed.key,
                    "no key or key resulted empty",
                ));
            }
            return Ok(Vec::new());
        }

        let bare_names: Vec<String> = match &key {
            serde_yaml::Value::String(s) => vec![or_default(s.clone(), default)],
            serde_yaml::Value::Sequence(items) => items
                .iter()
                .map(|item| or_default(value_to_string(item), default))
                .collect(),
            serde_yaml::Value::Mapping(map) => map
                .iter()
                .map(|(name, value)| {
                    let name = value_to_string(name);
                    let value = value_to_string(value);
                    if value.is_empty() {
                        if let Some(default) = default {
                            return format!("{}{}{}", name, keyed.separator, default);
                        }
                        if keyed.trailing_separator == Some(false) {
                            return name;
                        }
                    }
                    format!("{}{}{}", name, keyed.separator, value)
                })
                .collect(),
            other => {
                return Err(ExpressionError::new(
                    &keyed.key,
                    format!(
                        "invalid group name format, expected a string, a list or a mapping, got {}",
                        value_to_string(other)
                    ),
                ))
            }
        };

        let separator = if keyed.prefix.is_empty() && !self.config.leading_separator {
            ""
        } else {
            keyed.separator.as_str()
        };

        Ok(bare_names
            .into_iter()
            .map(|bare| self.config.group_name(&format!("{}{}{}", keyed.prefix, separator, bare)))
            .collect())
    }

    // Strict: propagate. Otherwise: warn and skip.
    fn tolerate<T>(
        &self,
        host: &str,
        entry: &str,
        result: std::result::Result<T, ExpressionError>,
    ) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.config.strict => Err(Error::expression(host, e)),
            Err(e) => {
                tracing::warn!(host, entry, "skipping constructed entry: {}", e);
                Ok(None)
            }
        }
    }
}

// Variables every host carries during group evaluation. `group_names` leaves
// out `all` and `ungrouped`.
fn with_magic_vars<G: InventoryGraph + ?Sized>(
    mut vars: Variables,
    graph: &G,
    host: &str,
) -> Variables {
    let mut group_names: Vec<String> = graph
        .host_groups(host)
        .into_iter()
        .filter(|g| g != ALL_GROUP && g != UNGROUPED_GROUP)
        .collect();
    group_names.sort();

    let short = host.split('.').next().unwrap_or(host);
    vars.insert("inventory_hostname".to_string(), host.into());
    vars.insert("inventory_hostname_short".to_string(), short.into());
    vars.insert(
        "group_names".to_string(),
        serde_yaml::Value::Sequence(group_names.into_iter().map(Into::into).collect()),
    );
    vars
}

fn or_default(name: String, default: Option<&str>) -> String {
    match default {
        Some(default) if name.is_empty() => default.to_string(),
        _ => name,
    }
}

fn is_truthy(value: &serde_yaml::Value) -> bool {
    match value {
        serde_yaml::Value::Null => false,
        serde_yaml::Value::Bool(b) => *b,
        serde_yaml::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_yaml::Value::String(s) => !s.is_empty(),
        serde_yaml::Value::Sequence(s) => !s.is_empty(),
        serde_yaml::Value::Mapping(m) => !m.is_empty(),
        serde_yaml::Value::Tagged(t) => is_truthy(&t.value),
    }
}

fn value_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
