//! Inventory source configuration.
//!
//! The configuration is read from a YAML inventory source such as
//! `prod.gs_inventory.yml`:
//!
//! ```yaml
//! plugin: bitnik.gridscale.gs_inventory
//! locations_filter: [de/fra]
//! status_filter: [active]
//! main_group: gridscale
//! hostname_template: "{{ location.replace('/', '-') }}-{{ hostname }}"
//! host_vars_filter: [ansible_host, location]
//! groups:
//!   cp: "'master' in hostname"
//! keyed_groups:
//!   - key: location
//!     prefix: loc
//! compose:
//!   ansible_user: "'root'"
//! ```
//!
//! Credentials may be left out of the file and supplied through
//! `GRIDSCALE_API_TOKEN` and `GRIDSCALE_USER_UUID`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::constructed::sanitize_group_name;
use crate::error::{Error, Result};

/// Accepted values for the `plugin` key
pub const PLUGIN_NAMES: [&str; 2] = ["gs_inventory", "bitnik.gridscale.gs_inventory"];

/// Host variables written when `host_vars_filter` is not set
pub const DEFAULT_HOST_VARS: [&str; 7] = [
    "uuid",
    "hostname",
    "location",
    "labels",
    "status",
    "public_ips",
    "ansible_host",
];

/// Environment variable holding the API token
pub const API_TOKEN_ENV: &str = "GRIDSCALE_API_TOKEN";

/// Environment variable holding the user UUID
pub const USER_UUID_ENV: &str = "GRIDSCALE_USER_UUID";

/// Configuration of one inventory source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Plugin name, one of [`PLUGIN_NAMES`]
    pub plugin: String,

    /// API token (falls back to `GRIDSCALE_API_TOKEN`)
    #[serde(default, alias = "token", skip_serializing)]
    pub api_token: Option<String>,

    /// User UUID (falls back to `GRIDSCALE_USER_UUID`)
    #[serde(default, skip_serializing)]
    pub user_uuid: Option<String>,

    /// Host variables written to each host (matched after renaming)
    #[serde(default = "default_host_vars_filter")]
    pub host_vars_filter: Vec<String>,

    /// Only servers in these locations
    #[serde(default)]
    pub locations_filter: Vec<String>,

    /// Only servers with these statuses
    #[serde(default)]
    pub status_filter: Vec<String>,

    /// Group every host is added to instead of `all`
    #[serde(default)]
    pub main_group: Option<String>,

    /// Keep only hosts that belong to one of these groups
    #[serde(default)]
    pub groups_filter: Vec<String>,

    /// Template for the inventory hostname
    #[serde(default)]
    pub hostname_template: Option<String>,

    /// Prefix for host variable names
    #[serde(default)]
    pub hostvars_prefix: String,

    /// Suffix for host variable names
    #[serde(default)]
    pub hostvars_suffix: String,

    /// Variables computed from expressions
    #[serde(default)]
    pub compose: IndexMap<String, String>,

    /// Conditional groups
    #[serde(default)]
    pub groups: IndexMap<String, String>,

    /// Groups derived from variable values
    #[serde(default)]
    pub keyed_groups: Vec<KeyedGroupConfig>,

    /// Fail on expression errors instead of skipping them
    #[serde(default)]
    pub strict: bool,

    /// Keep the separator on keyed groups that have no prefix
    #[serde(default = "default_true")]
    pub leading_separator: bool,

    /// Make extra vars visible to compose and keyed group keys
    #[serde(default)]
    pub use_extra_vars: bool,

    /// Replace characters outside `[A-Za-z0-9_]` in constructed group names
    #[serde(default)]
    pub sanitize_group_names: bool,

    /// Enable the server cache
    #[serde(default)]
    pub cache: bool,

    /// Cache lifetime in seconds
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout: u64,

    /// Directory for the file cache
    #[serde(default)]
    pub cache_connection: Option<PathBuf>,
}

fn default_host_vars_filter() -> Vec<String> {
    DEFAULT_HOST_VARS.iter().map(|s| (*s).to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_cache_timeout() -> u64 {
    3600
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            plugin: PLUGIN_NAMES[1].to_string(),
            api_token: None,
            user_uuid: None,
            host_vars_filter: default_host_vars_filter(),
            locations_filter: Vec::new(),
            status_filter: Vec::new(),
            main_group: None,
            groups_filter: Vec::new(),
            hostname_template: None,
            hostvars_prefix: String::new(),
            hostvars_suffix: String::new(),
            compose: IndexMap::new(),
            groups: IndexMap::new(),
            keyed_groups: Vec::new(),
            strict: false,
            leading_separator: true,
            use_extra_vars: false,
            sanitize_group_names: false,
            cache: false,
            cache_timeout: default_cache_timeout(),
            cache_connection: None,
        }
    }
}

impl InventoryConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a builder starting from the defaults
    pub fn builder() -> InventoryConfigBuilder {
        InventoryConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !PLUGIN_NAMES.contains(&self.plugin.as_str()) {
            return Err(Error::config(format!(
                "unknown plugin '{}', expected one of: {}",
                self.plugin,
                PLUGIN_NAMES.join(", ")
            )));
        }

        for (idx, keyed) in self.keyed_groups.iter().enumerate() {
            keyed.validate().map_err(|e| {
                Error::config(format!("keyed_groups[{}]: {}", idx, e))
            })?;
        }

        for (name, expr) in self.compose.iter().chain(self.groups.iter()) {
            if expr.trim().is_empty() {
                return Err(Error::config(format!("empty expression for '{}'", name)));
            }
        }

        Ok(())
    }

    /// The main group, ignoring an empty value
    pub fn main_group(&self) -> Option<&str> {
        self.main_group.as_deref().filter(|g| !g.is_empty())
    }

    /// The hostname template, ignoring an empty value
    pub fn hostname_template(&self) -> Option<&str> {
        self.hostname_template.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Name of a constructed group, sanitized when `sanitize_group_names` is set
    pub fn group_name(&self, name: &str) -> String {
        if self.sanitize_group_names {
            sanitize_group_name(name)
        } else {
            name.to_string()
        }
    }

    /// Whether host variables get renamed
    pub fn renames_host_vars(&self) -> bool {
        !self.hostvars_prefix.is_empty() || !self.hostvars_suffix.is_empty()
    }

    /// Resolve credentials from the file, then the process environment
    pub fn credentials(&self) -> Result<Credentials> {
        self.credentials_with(|name| std::env::var(name).ok())
    }

    /// Resolve credentials using `lookup` for environment fallbacks
    pub fn credentials_with<F>(&self, lookup: F) -> Result<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |value: &Option<String>, env: &str, option: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(env).filter(|v| !v.is_empty()))
                .ok_or_else(|| Error::MissingOption {
                    option: option.to_string(),
                })
        };

        Ok(Credentials {
            api_token: resolve(&self.api_token, API_TOKEN_ENV, "api_token")?,
            user_uuid: resolve(&self.user_uuid, USER_UUID_ENV, "user_uuid")?,
        })
    }
}

/// API credentials for one run
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Value for the `X-Auth-Token` header
    pub api_token: String,
    /// Value for the `X-Auth-UserId` header
    pub user_uuid: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_token", &"<redacted>")
            .field("user_uuid", &self.user_uuid)
            .finish()
    }
}

/// Keyed group configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedGroupConfig {
    /// Expression whose value names the group(s)
    pub key: String,

    /// Prefix for the generated group name
    #[serde(default)]
    pub prefix: String,

    /// Separator between prefix and value
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Parent group for all generated groups
    #[serde(default)]
    pub parent_group: Option<String>,

    /// Name used when the value is an empty string
    #[serde(default)]
    pub default_value: Option<String>,

    /// For mapping values, keep the separator when the value is empty
    #[serde(default)]
    pub trailing_separator: Option<bool>,
}

fn default_separator() -> String {
    "_".to_string()
}

impl KeyedGroupConfig {
    /// Create a new keyed group configuration
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prefix: String::new(),
            separator: default_separator(),
            parent_group: None,
            default_value: None,
            trailing_separator: None,
        }
    }

    /// Set the prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the separator
    pub fn with_separator(mut self, sep: impl Into<String>) -> Self {
        self.separator = sep.into();
        self
    }

    /// Set the parent group
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_group = Some(parent.into());
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    /// Set the trailing separator behavior
    pub fn with_trailing_separator(mut self, trailing: bool) -> Self {
        self.trailing_separator = Some(trailing);
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("key must not be empty".to_string());
        }
        if self.default_value.is_some() && self.trailing_separator.is_some() {
            return Err(
                "parameters are mutually exclusive: default_value, trailing_separator".to_string(),
            );
        }
        Ok(())
    }
}

/// Builder for [`InventoryConfig`]
#[derive(Debug, Clone, Default)]
pub struct InventoryConfigBuilder {
    config: InventoryConfig,
}

impl InventoryConfigBuilder {
    /// Set the API credentials
    pub fn credentials(mut self, api_token: impl Into<String>, user_uuid: impl Into<String>) -> Self {
        self.config.api_token = Some(api_token.into());
        self.config.user_uuid = Some(user_uuid.into());
        self
    }

    /// Replace the host variable filter
    pub fn host_vars_filter(mut self, vars: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.host_vars_filter = vars.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the location filter
    pub fn locations(mut self, locations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.locations_filter = locations.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the status filter
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.status_filter = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Set the main group
    pub fn main_group(mut self, group: impl Into<String>) -> Self {
        self.config.main_group = Some(group.into());
        self
    }

    /// Replace the groups filter
    pub fn groups_filter(mut self, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.groups_filter = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Set the hostname template
    pub fn hostname_template(mut self, template: impl Into<String>) -> Self {
        self.config.hostname_template = Some(template.into());
        self
    }

    /// Set the host variable prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.hostvars_prefix = prefix.into();
        self
    }

    /// Set the host variable suffix
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.hostvars_suffix = suffix.into();
        self
    }

    /// Add a compose expression
    pub fn compose(mut self, variable: impl Into<String>, expression: impl Into<String>) -> Self {
        self.config.compose.insert(variable.into(), expression.into());
        self
    }

    /// Add a conditional group
    pub fn group(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.config.groups.insert(name.into(), expression.into());
        self
    }

    /// Add a keyed group
    pub fn keyed_group(mut self, group: KeyedGroupConfig) -> Self {
        self.config.keyed_groups.push(group);
        self
    }

    /// Set strict mode
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// Set leading separator behavior for keyed groups
    pub fn leading_separator(mut self, leading: bool) -> Self {
        self.config.leading_separator = leading;
        self
    }

    /// Expose extra vars to compose and keyed group keys
    pub fn use_extra_vars(mut self, enabled: bool) -> Self {
        self.config.use_extra_vars = enabled;
        self
    }

    /// Sanitize constructed group names
    pub fn sanitize_group_names(mut self, enabled: bool) -> Self {
        self.config.sanitize_group_names = enabled;
        self
    }

    /// Enable caching with the given timeout in seconds
    pub fn cache(mut self, timeout_secs: u64) -> Self {
        self.config.cache = true;
        self.config.cache_timeout = timeout_secs;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<InventoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config = InventoryConfig::from_yaml("plugin: gs_inventory\n").unwrap();
        assert_eq!(config.host_vars_filter, DEFAULT_HOST_VARS);
        assert!(config.locations_filter.is_empty());
        assert!(config.main_group().is_none());
        assert!(config.leading_separator);
        assert!(!config.strict);
        assert!(!config.sanitize_group_names);
        assert_eq!(config.cache_timeout, 3600);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
plugin: bitnik.gridscale.gs_inventory
token: secret
user_uuid: 0000-1111
locations_filter: [de/fra]
status_filter: [active, paused]
main_group: gridscale
hostname_template: "{{ hostname }}"
hostvars_prefix: gs_
host_vars_filter: [ansible_host, gs_location]
compose:
  ansible_user: "'root'"
groups:
  cp: "'master' in gs_hostname"
keyed_groups:
  - key: gs_location
    prefix: loc
    parent_group: locations
strict: true
        "#;

        let config = InventoryConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.main_group(), Some("gridscale"));
        assert_eq!(config.status_filter, vec!["active", "paused"]);
        assert_eq!(config.compose.get("ansible_user").map(String::as_str), Some("'root'"));
        assert_eq!(config.keyed_groups[0].separator, "_");
        assert_eq!(config.keyed_groups[0].parent_group.as_deref(), Some("locations"));
        assert!(config.renames_host_vars());
        assert!(config.strict);
    }

    #[test]
    fn test_unknown_plugin_rejected() {
        let err = InventoryConfig::from_yaml("plugin: aws_ec2\n").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_keyed_group_exclusive_options() {
        let result = InventoryConfig::builder()
            .keyed_group(
                KeyedGroupConfig::new("location")
                    .with_default("none")
                    .with_trailing_separator(false),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_strings_mean_unset() {
        let config = InventoryConfig::from_yaml(
            "plugin: gs_inventory\nmain_group: ''\nhostname_template: ''\n",
        )
        .unwrap();
        assert!(config.main_group().is_none());
        assert!(config.hostname_template().is_none());
    }

    #[test]
    fn test_credentials_fall_back_to_environment() {
        let config = InventoryConfig::builder().build().unwrap();
        let creds = config
            .credentials_with(|name| match name {
                API_TOKEN_ENV => Some("env-token".to_string()),
                USER_UUID_ENV => Some("env-user".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(creds.api_token, "env-token");
        assert_eq!(creds.user_uuid, "env-user");
        assert!(!format!("{:?}", creds).contains("env-token"));
    }

    #[test]
    fn test_missing_credentials() {
        let config = InventoryConfig::builder().build().unwrap();
        let err = config.credentials_with(|_| None).unwrap_err();
        assert!(matches!(err, Error::MissingOption { ref option } if option == "api_token"));
    }

    #[test]
    fn test_file_values_win_over_environment() {
        let config = InventoryConfig::builder()
            .credentials("file-token", "file-user")
            .build()
            .unwrap();
        let creds = config
            .credentials_with(|_| Some("env".to_string()))
            .unwrap();
        assert_eq!(creds.api_token, "file-token");
    }
}
