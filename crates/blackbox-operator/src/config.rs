//! Application configuration
//!
//! Options set by the administrator on the deployed application. Loaded from
//! a YAML document and validated before any reconciliation runs.

use crate::error::{OperatorError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Workload container and service name
pub const CONTAINER_NAME: &str = "blackbox";

/// Port the exporter listens on
pub const EXPORTER_PORT: u16 = 9115;

/// Exporter configuration file inside the workload container
pub const CONFIG_PATH: &str = "/etc/blackbox_exporter/config.yml";

/// Exporter log file inside the workload container
pub const LOG_PATH: &str = "/var/blackbox.log";

/// Endpoint receiving probes from related applications
pub const PROBES_RELATION: &str = "probes";

/// Endpoint publishing the exporter's scrape jobs
pub const METRICS_ENDPOINT_RELATION: &str = "self-metrics-endpoint";

/// Endpoint providing the ingress URL
pub const INGRESS_RELATION: &str = "ingress";

/// Regex for validating Kubernetes resource quantities (e.g., "500m", "1Gi")
static QUANTITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+(\.[0-9]+)?(m|Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$")
        .expect("quantity regex is valid")
});

/// Validate a Kubernetes resource quantity string
fn validate_quantity(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() || QUANTITY_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_quantity")
            .with_message(format!("'{}' is not a valid Kubernetes quantity", value).into()))
    }
}

/// Configuration options of the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct CharmConfig {
    /// Full exporter configuration; empty selects the built-in modules
    #[serde(default)]
    pub config_file: String,

    /// Static probes as a document with a top-level `scrape_configs`
    #[serde(default)]
    pub probes_file: String,

    /// CPU limit for the workload container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_quantity"))]
    pub cpu: Option<String>,

    /// Memory limit for the workload container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_quantity"))]
    pub memory: Option<String>,
}

impl CharmConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.check()?;
        Ok(config)
    }

    /// Read the configuration from a file; a missing file yields defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate option values
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors
                .field_errors()
                .iter()
                .flat_map(|(field, errs)| {
                    errs.iter().map(move |e| {
                        let message = e
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string());
                        format!("{}: {}", field, message)
                    })
                })
                .collect();
            OperatorError::InvalidConfig(messages.join("; "))
        })
    }

    /// Empty strings count as unset
    pub fn cpu_limit(&self) -> Option<&str> {
        self.cpu.as_deref().filter(|v| !v.is_empty())
    }

    pub fn memory_limit(&self) -> Option<&str> {
        self.memory.as_deref().filter(|v| !v.is_empty())
    }
}
