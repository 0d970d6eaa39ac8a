//! Lifecycle triggers understood by the provider and requirer

use crate::relation::RelationId;

/// A relation event's target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    pub id: RelationId,
    /// Endpoint name the event fired on
    pub name: String,
}

impl RelationRef {
    pub fn new(id: RelationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Lifecycle events that may change what is published or observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    ConfigChanged,
    RelationJoined(RelationRef),
    RelationChanged(RelationRef),
    RelationDeparted(RelationRef),
    LeaderElected,
    /// Any other event the owner wants to republish on
    Refresh,
}

impl Trigger {
    /// The relation this trigger concerns, if any
    pub fn relation(&self) -> Option<&RelationRef> {
        match self {
            Trigger::RelationJoined(r)
            | Trigger::RelationChanged(r)
            | Trigger::RelationDeparted(r) => Some(r),
            Trigger::ConfigChanged | Trigger::LeaderElected | Trigger::Refresh => None,
        }
    }

    /// Whether this is a relation event on the named endpoint
    pub fn is_relation_event_for(&self, name: &str) -> bool {
        self.relation().is_some_and(|r| r.name == name)
    }
}
