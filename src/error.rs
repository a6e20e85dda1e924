//! Error types for the gridscale inventory.
//!
//! Every failure surfaces to the caller as one of three kinds: a bad
//! configuration (fatal before any population), a failed expression (fatal
//! only in strict mode), or an unavailable server list.

use std::path::PathBuf;
use thiserror::Error;

use crate::inventory::InventoryError;
use crate::template::ExpressionError;

/// Result type alias for inventory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the gridscale inventory.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Malformed or missing configuration option.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Required option that could not be resolved from the file or environment.
    #[error("Missing required option '{option}'")]
    MissingOption {
        /// Option name as written in the inventory source
        option: String,
    },

    /// The inventory source file is not one this plugin accepts.
    #[error("Inventory source '{}' is not a gs_inventory file", path.display())]
    UnsupportedSource {
        /// Path to the inventory source
        path: PathBuf,
    },

    // ========================================================================
    // Expression Errors
    // ========================================================================
    /// A template, compose expression or conditional failed to evaluate.
    #[error("Could not evaluate expression for host '{host}': {source}")]
    Expression {
        /// Host being populated when the expression failed
        host: String,
        /// Evaluation failure
        #[source]
        source: ExpressionError,
    },

    // ========================================================================
    // Source Errors
    // ========================================================================
    /// The upstream server list could not be obtained.
    #[error("Failed to fetch servers: {0}")]
    Source(String),

    // ========================================================================
    // Wrapped Errors
    // ========================================================================
    /// Inventory graph mutation failed.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a source error.
    pub fn source_failed(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    /// Attach an expression failure to the host it occurred on.
    pub fn expression(host: impl Into<String>, source: ExpressionError) -> Self {
        Self::Expression {
            host: host.into(),
            source,
        }
    }

    /// Whether this error was raised before any population happened.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::MissingOption { .. }
                | Self::UnsupportedSource { .. }
                | Self::Yaml(_)
        )
    }
}
