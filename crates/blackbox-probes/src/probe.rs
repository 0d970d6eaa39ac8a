//! Probe and module definitions
//!
//! A [`Probe`] is a Prometheus scrape job routed through the Blackbox
//! Exporter: `params.module` names the prober module and `static_configs`
//! lists the endpoints to probe. Modules are opaque prober settings keyed by
//! name and forwarded verbatim into the exporter configuration.

use crate::error::{describe_validation_errors, ProbesError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

/// Parameter key selecting the prober module
pub const MODULE_PARAM: &str = "module";

/// Prober settings of a single module
pub type Module = serde_json::Map<String, serde_json::Value>;

/// Modules keyed by name
pub type Modules = BTreeMap<String, Module>;

/// A scrape job executed through the exporter's `/probe` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Probe {
    /// Job name, unique only within a single publisher
    #[serde(default)]
    #[validate(length(min = 1, message = "job_name must not be empty"))]
    pub job_name: String,

    /// URL parameters passed to `/probe`; must carry `module`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[validate(custom(function = "validate_module_param"))]
    pub params: BTreeMap<String, Vec<String>>,

    /// Targets to probe
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[validate(length(min = 1, message = "static_configs must not be empty"), nested)]
    pub static_configs: Vec<StaticConfig>,

    /// Remaining scrape job settings, carried verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A group of targets sharing the same labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StaticConfig {
    #[serde(default)]
    #[validate(length(min = 1, message = "targets must not be empty"))]
    pub targets: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn validate_module_param(
    params: &BTreeMap<String, Vec<String>>,
) -> std::result::Result<(), ValidationError> {
    match params.get(MODULE_PARAM) {
        Some(modules) if !modules.is_empty() => Ok(()),
        Some(_) => Err(ValidationError::new("empty_module")
            .with_message("params.module must list at least one module".into())),
        None => Err(ValidationError::new("missing_module")
            .with_message("params.module is required".into())),
    }
}

impl Probe {
    /// Create a probe for a single module and target group
    pub fn new(
        job_name: impl Into<String>,
        module: impl Into<String>,
        targets: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut params = BTreeMap::new();
        params.insert(MODULE_PARAM.to_string(), vec![module.into()]);
        Self {
            job_name: job_name.into(),
            params,
            static_configs: vec![StaticConfig {
                targets: targets.into_iter().map(Into::into).collect(),
                labels: BTreeMap::new(),
            }],
            extra: BTreeMap::new(),
        }
    }

    /// Add a label to every target group
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        for group in &mut self.static_configs {
            group.labels.insert(key.clone(), value.clone());
        }
        self
    }

    /// Modules requested through `params.module`
    pub fn modules(&self) -> &[String] {
        self.params
            .get(MODULE_PARAM)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether the probe passes [`validate_probe`]
    pub fn is_valid(&self) -> bool {
        validate_probe(self).is_ok()
    }
}

/// Check a probe's structure before it is published or consumed
pub fn validate_probe(probe: &Probe) -> Result<()> {
    probe.validate().map_err(|errors| {
        let name = if probe.job_name.is_empty() {
            "<unnamed>"
        } else {
            probe.job_name.as_str()
        };
        ProbesError::Validation(format!(
            "probe '{}': {}",
            name,
            describe_validation_errors(&errors)
        ))
    })
}

/// Check every probe, failing on the first invalid one
pub fn validate_probes(probes: &[Probe]) -> Result<()> {
    probes.iter().try_for_each(validate_probe)
}

/// Check a module map: names must be non-empty. Bodies are opaque prober
/// settings and may override only part of a module.
pub fn validate_modules(modules: &Modules) -> Result<()> {
    if modules.keys().any(String::is_empty) {
        return Err(ProbesError::Validation(
            "module name must not be empty".to_string(),
        ));
    }
    Ok(())
}
