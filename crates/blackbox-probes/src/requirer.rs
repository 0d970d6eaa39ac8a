//! Probes requirer
//!
//! Owned by the Blackbox Exporter side. The requirer is a read-through view
//! over every related application's probes record: it merges their probes
//! and modules on demand and tells its owner when the published targets
//! change.

use crate::event::{RelationRef, Trigger};
use crate::probe::{validate_probe, Modules, Probe};
use crate::provider::DEFAULT_RELATION_NAME;
use crate::relation::{
    Databag, Relation, RelationStore, Scope, SCRAPE_METADATA_KEY, SCRAPE_MODULES_KEY,
    SCRAPE_PROBES_KEY,
};
use crate::topology::Topology;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const RECORD_KEYS: [&str; 3] = [SCRAPE_METADATA_KEY, SCRAPE_PROBES_KEY, SCRAPE_MODULES_KEY];

/// Receives `targets_changed` notifications
pub trait TargetsChangedSink: Send + Sync {
    fn targets_changed(&self, relation: Option<&RelationRef>);
}

/// Sink that counts notifications
#[derive(Debug, Default)]
pub struct CountingSink {
    count: AtomicUsize,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl TargetsChangedSink for CountingSink {
    fn targets_changed(&self, _relation: Option<&RelationRef>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Merged view over every peer's probes record
pub struct ProbesRequirer {
    store: Arc<dyn RelationStore>,
    relation_name: String,
    sink: Arc<dyn TargetsChangedSink>,
    last_observed: Option<String>,
}

impl ProbesRequirer {
    /// Create a requirer on the default `probes` endpoint
    pub fn new(store: Arc<dyn RelationStore>, sink: Arc<dyn TargetsChangedSink>) -> Self {
        Self {
            store,
            relation_name: DEFAULT_RELATION_NAME.to_string(),
            sink,
            last_observed: None,
        }
    }

    /// Read from a different endpoint
    pub fn with_relation_name(mut self, name: impl Into<String>) -> Self {
        self.relation_name = name.into();
        self
    }

    /// Seed the fingerprint of the last observed view, e.g. from a previous
    /// dispatch
    pub fn with_last_observed(mut self, fingerprint: Option<String>) -> Self {
        self.last_observed = fingerprint;
        self
    }

    /// Fingerprint of the last observed view; `None` when nothing was published
    pub fn last_observed(&self) -> Option<&str> {
        self.last_observed.as_deref()
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Probes published by all related applications, exact duplicates removed
    pub fn probes(&self) -> Vec<Probe> {
        let mut merged: Vec<Probe> = Vec::new();
        for (relation, bag) in self.peer_records() {
            let Some(probes) = decode::<Vec<Probe>>(&relation, &bag, SCRAPE_PROBES_KEY) else {
                continue;
            };
            for probe in probes {
                if let Err(e) = validate_probe(&probe) {
                    warn!(relation_id = %relation.id, error = %e, "Skipping invalid probe");
                    continue;
                }
                if !merged.contains(&probe) {
                    merged.push(probe);
                }
            }
        }
        merged
    }

    /// Modules published by all related applications; later peers win on
    /// key collisions
    pub fn modules(&self) -> Modules {
        let mut merged = Modules::new();
        for (relation, bag) in self.peer_records() {
            if let Some(modules) = decode::<Modules>(&relation, &bag, SCRAPE_MODULES_KEY) {
                merged.extend(modules);
            }
        }
        merged
    }

    /// Topologies of the related applications that published metadata
    pub fn metadata(&self) -> Vec<Topology> {
        self.peer_records()
            .into_iter()
            .filter_map(|(relation, bag)| {
                let raw = bag.get(SCRAPE_METADATA_KEY)?;
                match Topology::from_metadata(raw) {
                    Ok(topology) => Some(topology),
                    Err(e) => {
                        warn!(
                            relation_id = %relation.id,
                            error = %e,
                            "Ignoring malformed scrape metadata"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// React to a lifecycle trigger; returns whether `targets_changed` was
    /// emitted
    pub fn handle(&mut self, trigger: &Trigger) -> bool {
        match trigger {
            Trigger::RelationJoined(r)
            | Trigger::RelationChanged(r)
            | Trigger::RelationDeparted(r)
                if r.name == self.relation_name =>
            {
                self.observe(Some(r))
            }
            _ => false,
        }
    }

    /// Compare the current view with the last observed one and notify once
    /// on difference
    pub fn observe(&mut self, relation: Option<&RelationRef>) -> bool {
        let current = self.fingerprint();
        if current == self.last_observed {
            debug!("Probes view unchanged");
            return false;
        }
        self.last_observed = current;
        info!(relation = ?relation.map(|r| r.id), "Probe targets changed");
        self.sink.targets_changed(relation);
        true
    }

    /// Application databags of the remote side of every relation
    fn peer_records(&self) -> Vec<(Relation, Databag)> {
        self.store
            .relations(&self.relation_name)
            .into_iter()
            .filter_map(|relation| {
                let app = relation.remote_app.clone()?;
                let bag = self.store.read(relation.id, &Scope::App(app));
                Some((relation, bag))
            })
            .collect()
    }

    /// Digest of every remote databag's record keys; `None` when empty
    fn fingerprint(&self) -> Option<String> {
        let mut hasher = Sha256::new();
        let mut seen = false;
        for relation in self.store.relations(&self.relation_name) {
            for scope in relation.remote_scopes() {
                let bag = self.store.read(relation.id, &scope);
                let id = relation.id.to_string();
                let owner = format!("{:?}", scope);
                for key in RECORD_KEYS {
                    if let Some(value) = bag.get(key) {
                        seen = true;
                        for part in [id.as_str(), owner.as_str(), key, value.as_str()] {
                            hasher.update((part.len() as u64).to_be_bytes());
                            hasher.update(part.as_bytes());
                        }
                    }
                }
            }
        }
        if !seen {
            return None;
        }
        Some(hex::encode(hasher.finalize()))
    }
}

/// Decode one key of a peer databag; missing keys and malformed payloads
/// yield `None`
fn decode<T: DeserializeOwned>(relation: &Relation, bag: &Databag, key: &str) -> Option<T> {
    let raw = bag.get(key)?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                relation_id = %relation.id,
                remote_app = relation.remote_app.as_deref().unwrap_or("<unknown>"),
                key,
                error = %e,
                "Skipping malformed relation data"
            );
            None
        }
    }
}
