//! Probes provider
//!
//! Owned by an application that wants the Blackbox Exporter to probe
//! endpoints on its behalf. The provider validates its static probes and
//! modules, namespaces their names with the application's topology
//! identifier, and publishes them in its application databag on every
//! relation of its endpoint.

use crate::error::Result;
use crate::event::Trigger;
use crate::probe::{validate_modules, validate_probes, Modules, Probe};
use crate::relation::{
    Databag, RelationStore, Scope, SCRAPE_METADATA_KEY, SCRAPE_MODULES_KEY, SCRAPE_PROBES_KEY,
};
use crate::topology::Topology;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default endpoint name of the probes relation
pub const DEFAULT_RELATION_NAME: &str = "probes";

/// Status message reported when probes or modules fail validation
pub const PROBE_CONFIG_ERROR: &str = "Errors occurred in probe configuration";

/// Outcome of the most recent validation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProbesStatus {
    #[default]
    Active,
    Blocked(String),
}

impl ProbesStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ProbesStatus::Active)
    }
}

/// Result of a publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Validation failed; nothing was written
    Blocked,
    /// The local unit is not the leader; nothing was written
    NotLeader,
    /// The record was written to `relations` relations, `changed` of which
    /// held different content before
    Published { relations: usize, changed: usize },
}

/// Publishes an application's probes and modules
pub struct ProbesProvider {
    store: Arc<dyn RelationStore>,
    relation_name: String,
    topology: Topology,
    probes: Vec<Probe>,
    modules: Modules,
    status: ProbesStatus,
}

impl ProbesProvider {
    /// Create a provider on the default `probes` endpoint
    pub fn new(
        store: Arc<dyn RelationStore>,
        topology: Topology,
        probes: Vec<Probe>,
        modules: Modules,
    ) -> Self {
        Self {
            store,
            relation_name: DEFAULT_RELATION_NAME.to_string(),
            topology,
            probes,
            modules,
            status: ProbesStatus::Active,
        }
    }

    /// Publish on a different endpoint
    pub fn with_relation_name(mut self, name: impl Into<String>) -> Self {
        self.relation_name = name.into();
        self
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Status of the most recent validation
    pub fn status(&self) -> &ProbesStatus {
        &self.status
    }

    /// React to a lifecycle trigger, publishing when it is relevant.
    ///
    /// Returns `None` for triggers the provider ignores.
    pub fn handle(&mut self, trigger: &Trigger, is_leader: bool) -> Result<Option<PublishOutcome>> {
        let relevant = match trigger {
            Trigger::RelationJoined(r) => r.name == self.relation_name,
            Trigger::LeaderElected | Trigger::ConfigChanged | Trigger::Refresh => true,
            Trigger::RelationChanged(_) | Trigger::RelationDeparted(_) => false,
        };
        if !relevant {
            return Ok(None);
        }
        self.publish(is_leader).map(Some)
    }

    /// Validate, prefix and publish the probes record
    pub fn publish(&mut self, is_leader: bool) -> Result<PublishOutcome> {
        if let Err(e) = validate_probes(&self.probes).and_then(|_| validate_modules(&self.modules))
        {
            warn!(
                application = %self.topology.application,
                error = %e,
                "Refusing to publish invalid probes"
            );
            self.status = ProbesStatus::Blocked(PROBE_CONFIG_ERROR.to_string());
            return Ok(PublishOutcome::Blocked);
        }
        self.status = ProbesStatus::Active;

        if !is_leader {
            debug!("Not leader, skipping probes publication");
            return Ok(PublishOutcome::NotLeader);
        }

        let record = self.record()?;
        let scope = Scope::App(self.topology.application.clone());
        let relations = self.store.relations(&self.relation_name);

        let mut changed = 0;
        for relation in &relations {
            if self.store.write(relation.id, &scope, record.clone())? {
                changed += 1;
            }
        }

        info!(
            relations = relations.len(),
            changed,
            probes = self.probes.len(),
            modules = self.modules.len(),
            "Published probes"
        );

        Ok(PublishOutcome::Published {
            relations: relations.len(),
            changed,
        })
    }

    /// Probes with job names namespaced by the topology identifier
    pub fn prefixed_probes(&self) -> Vec<Probe> {
        self.probes
            .iter()
            .map(|probe| Probe {
                job_name: self.topology.prefixed(&probe.job_name),
                ..probe.clone()
            })
            .collect()
    }

    /// Modules with keys namespaced by the topology identifier
    pub fn prefixed_modules(&self) -> Modules {
        self.modules
            .iter()
            .map(|(name, module)| (self.topology.prefixed(name), module.clone()))
            .collect()
    }

    fn record(&self) -> Result<Databag> {
        let mut record = Databag::new();
        record.insert(SCRAPE_METADATA_KEY.to_string(), self.topology.as_metadata()?);
        record.insert(
            SCRAPE_PROBES_KEY.to_string(),
            serde_json::to_string(&self.prefixed_probes())?,
        );
        record.insert(
            SCRAPE_MODULES_KEY.to_string(),
            serde_json::to_string(&self.prefixed_modules())?,
        );
        Ok(record)
    }
}
