//! Relation channel
//!
//! Relations are key/value exchanges between two applications. Every
//! application and unit on a relation owns a databag that only it may write
//! and that the remote side reads. [`RelationStore`] is the seam the provider
//! and requirer use to reach that data; [`InMemoryRelationStore`] backs tests
//! and the operator's persisted dispatch state.

use crate::error::{ProbesError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keys of a probes relation record
pub const SCRAPE_METADATA_KEY: &str = "scrape_metadata";
pub const SCRAPE_PROBES_KEY: &str = "scrape_probes";
pub const SCRAPE_MODULES_KEY: &str = "scrape_modules";

/// Key/value content of one databag
pub type Databag = BTreeMap<String, String>;

/// Numeric relation identifier assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of a databag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Scope {
    /// Application-wide databag, writable by the leader only
    App(String),
    /// Per-unit databag
    Unit(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::App(name) | Scope::Unit(name) => f.write_str(name),
        }
    }
}

/// A relation as seen from the local application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    /// Endpoint name in the local metadata (e.g. `probes`)
    pub name: String,
    /// Remote application, absent while the relation is being torn down
    #[serde(default)]
    pub remote_app: Option<String>,
    #[serde(default)]
    pub remote_units: Vec<String>,
}

impl Relation {
    /// Scopes owned by the remote side of this relation
    pub fn remote_scopes(&self) -> Vec<Scope> {
        self.remote_app
            .iter()
            .map(|app| Scope::App(app.clone()))
            .chain(self.remote_units.iter().map(|u| Scope::Unit(u.clone())))
            .collect()
    }
}

/// Access to relation databags
pub trait RelationStore: Send + Sync {
    /// Relations currently established on an endpoint, ordered by id
    fn relations(&self, name: &str) -> Vec<Relation>;

    /// Read a databag; unknown relations and scopes read as empty
    fn read(&self, relation: RelationId, scope: &Scope) -> Databag;

    /// Merge `data` into a databag, returning whether anything changed
    fn write(&self, relation: RelationId, scope: &Scope, data: Databag) -> Result<bool>;
}

/// Serializable state of an [`InMemoryRelationStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSnapshot {
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub databags: Vec<DatabagEntry>,
}

/// One databag inside a [`RelationSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabagEntry {
    pub relation: RelationId,
    pub scope: Scope,
    #[serde(default)]
    pub data: Databag,
}

#[derive(Debug, Default)]
struct StoreState {
    relations: BTreeMap<RelationId, Relation>,
    databags: BTreeMap<(RelationId, Scope), Databag>,
}

/// Relation store held in memory
#[derive(Debug, Default)]
pub struct InMemoryRelationStore {
    state: RwLock<StoreState>,
}

impl InMemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot
    pub fn from_snapshot(snapshot: RelationSnapshot) -> Self {
        let mut state = StoreState::default();
        for relation in snapshot.relations {
            state.relations.insert(relation.id, relation);
        }
        for entry in snapshot.databags {
            state.databags.insert((entry.relation, entry.scope), entry.data);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Capture the store content, ordered by relation and scope
    pub fn snapshot(&self) -> RelationSnapshot {
        let state = self.state.read();
        RelationSnapshot {
            relations: state.relations.values().cloned().collect(),
            databags: state
                .databags
                .iter()
                .filter(|(_, data)| !data.is_empty())
                .map(|((relation, scope), data)| DatabagEntry {
                    relation: *relation,
                    scope: scope.clone(),
                    data: data.clone(),
                })
                .collect(),
        }
    }

    /// Establish (or replace) a relation
    pub fn add_relation(&self, relation: Relation) {
        self.state.write().relations.insert(relation.id, relation);
    }

    /// Add a unit to the remote side of a relation
    pub fn add_remote_unit(&self, relation: RelationId, unit: impl Into<String>) -> Result<()> {
        let mut state = self.state.write();
        let entry = state
            .relations
            .get_mut(&relation)
            .ok_or_else(|| ProbesError::Relation(format!("relation {} not found", relation)))?;
        let unit = unit.into();
        if !entry.remote_units.contains(&unit) {
            entry.remote_units.push(unit);
        }
        Ok(())
    }

    /// Remove a relation and every databag attached to it
    pub fn remove_relation(&self, relation: RelationId) -> Option<Relation> {
        let mut state = self.state.write();
        state.databags.retain(|(id, _), _| *id != relation);
        state.relations.remove(&relation)
    }

    /// Replace a databag wholesale, as the remote side would
    pub fn set_databag(&self, relation: RelationId, scope: Scope, data: Databag) {
        self.state.write().databags.insert((relation, scope), data);
    }
}

impl RelationStore for InMemoryRelationStore {
    fn relations(&self, name: &str) -> Vec<Relation> {
        self.state
            .read()
            .relations
            .values()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    fn read(&self, relation: RelationId, scope: &Scope) -> Databag {
        self.state
            .read()
            .databags
            .get(&(relation, scope.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn write(&self, relation: RelationId, scope: &Scope, data: Databag) -> Result<bool> {
        let mut state = self.state.write();
        if !state.relations.contains_key(&relation) {
            return Err(ProbesError::Relation(format!(
                "relation {} not found",
                relation
            )));
        }
        let bag = state.databags.entry((relation, scope.clone())).or_default();
        let mut changed = false;
        for (key, value) in data {
            if bag.get(&key) != Some(&value) {
                bag.insert(key, value);
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(id: u32, app: &str) -> Relation {
        Relation {
            id: RelationId(id),
            name: "probes".to_string(),
            remote_app: Some(app.to_string()),
            remote_units: vec![],
        }
    }

    fn bag(pairs: &[(&str, &str)]) -> Databag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_write_reports_changes() {
        let store = InMemoryRelationStore::new();
        store.add_relation(relation(1, "provider"));
        let scope = Scope::App("blackbox".to_string());

        assert!(store.write(RelationId(1), &scope, bag(&[("a", "1")])).unwrap());
        assert!(!store.write(RelationId(1), &scope, bag(&[("a", "1")])).unwrap());
        assert!(store.write(RelationId(1), &scope, bag(&[("a", "2")])).unwrap());
        assert_eq!(store.read(RelationId(1), &scope), bag(&[("a", "2")]));
    }

    #[test]
    fn test_write_to_unknown_relation_fails() {
        let store = InMemoryRelationStore::new();
        let scope = Scope::App("blackbox".to_string());
        assert!(store.write(RelationId(7), &scope, bag(&[("a", "1")])).is_err());
    }

    #[test]
    fn test_relations_filtered_by_name() {
        let store = InMemoryRelationStore::new();
        store.add_relation(relation(2, "b"));
        store.add_relation(relation(1, "a"));
        store.add_relation(Relation {
            name: "logging".to_string(),
            ..relation(3, "loki")
        });

        let ids: Vec<_> = store.relations("probes").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RelationId(1), RelationId(2)]);
    }

    #[test]
    fn test_remove_relation_drops_databags() {
        let store = InMemoryRelationStore::new();
        store.add_relation(relation(1, "provider"));
        let scope = Scope::App("provider".to_string());
        store.set_databag(RelationId(1), scope.clone(), bag(&[("k", "v")]));

        store.remove_relation(RelationId(1));
        assert!(store.read(RelationId(1), &scope).is_empty());
        assert!(store.relations("probes").is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = InMemoryRelationStore::new();
        store.add_relation(relation(1, "provider"));
        store.add_remote_unit(RelationId(1), "provider/0").unwrap();
        store.set_databag(
            RelationId(1),
            Scope::Unit("provider/0".to_string()),
            bag(&[("k", "v")]),
        );

        let snapshot = store.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored =
            InMemoryRelationStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(
            restored.relations("probes")[0].remote_scopes(),
            vec![
                Scope::App("provider".to_string()),
                Scope::Unit("provider/0".to_string())
            ]
        );
    }
}
