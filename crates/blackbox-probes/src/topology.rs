//! Topology of a publishing application
//!
//! A [`Topology`] names the model, application and unit a probe definition
//! comes from. Its [`identifier`](Topology::identifier) namespaces every job
//! and module name a provider publishes, so two applications that both define
//! `my-first-job` never collide on the requirer side.

use crate::error::{ProbesError, Result};
use serde::{Deserialize, Serialize};

/// Number of model UUID characters kept in the identifier
const MODEL_UUID_SHORT_LEN: usize = 8;

/// Identity of an application publishing probes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topology {
    pub model: String,
    pub model_uuid: String,
    pub application: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charm_name: Option<String>,
}

impl Topology {
    /// Build a topology, rejecting empty names and malformed model UUIDs
    pub fn new(
        model: impl Into<String>,
        model_uuid: impl Into<String>,
        application: impl Into<String>,
    ) -> Result<Self> {
        let topology = Self {
            model: model.into(),
            model_uuid: model_uuid.into(),
            application: application.into(),
            unit: None,
            charm_name: None,
        };
        topology.check()?;
        Ok(topology)
    }

    /// Attach the unit name (e.g. `blackbox/0`)
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attach the charm name
    pub fn with_charm_name(mut self, charm_name: impl Into<String>) -> Self {
        self.charm_name = Some(charm_name.into());
        self
    }

    fn check(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(ProbesError::InvalidTopology("model name is empty".to_string()));
        }
        if self.application.is_empty() {
            return Err(ProbesError::InvalidTopology(
                "application name is empty".to_string(),
            ));
        }
        uuid::Uuid::parse_str(&self.model_uuid).map_err(|e| {
            ProbesError::InvalidTopology(format!(
                "'{}' is not a valid model UUID: {}",
                self.model_uuid, e
            ))
        })?;
        Ok(())
    }

    /// Leading characters of the model UUID
    pub fn model_uuid_short(&self) -> &str {
        let end = self
            .model_uuid
            .char_indices()
            .nth(MODEL_UUID_SHORT_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.model_uuid.len());
        &self.model_uuid[..end]
    }

    /// Terse identifier `{model}_{uuid8}_{application}`.
    ///
    /// Unit and charm name are left out: every unit of an application shares
    /// one identifier, which keeps published names stable across leader
    /// changes.
    pub fn identifier(&self) -> String {
        format!(
            "{}_{}_{}",
            self.model,
            self.model_uuid_short(),
            self.application
        )
        .replace('/', "_")
    }

    /// Prefix applied to job and module names published by this application
    pub fn name_prefix(&self) -> String {
        format!("juju_{}_", self.identifier())
    }

    /// Apply [`name_prefix`](Self::name_prefix) to a name
    pub fn prefixed(&self, name: &str) -> String {
        format!("{}{}", self.name_prefix(), name)
    }

    /// Serialized form written as `scrape_metadata`
    pub fn as_metadata(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a `scrape_metadata` value
    pub fn from_metadata(metadata: &str) -> Result<Self> {
        let topology: Self = serde_json::from_str(metadata)?;
        topology.check()?;
        Ok(topology)
    }
}
