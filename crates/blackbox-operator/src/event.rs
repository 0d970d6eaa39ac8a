//! Host lifecycle events
//!
//! The host runs the operator once per event and names the event through
//! its dispatch path (`hooks/config-changed`, `actions/show-config`, ...).
//! [`HookEvent`] is the parsed form; [`HookEvent::trigger`] is the dispatch
//! table that maps it onto the probes protocol's [`Trigger`].

use crate::config::{CONTAINER_NAME, INGRESS_RELATION, METRICS_ENDPOINT_RELATION};
use crate::error::{OperatorError, Result};
use blackbox_probes::event::{RelationRef, Trigger};
use blackbox_probes::relation::RelationId;
use std::fmt;

/// Phase of a relation event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationPhase {
    Created,
    Joined,
    Changed,
    Departed,
    Broken,
}

impl RelationPhase {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "created" => Some(Self::Created),
            "joined" => Some(Self::Joined),
            "changed" => Some(Self::Changed),
            "departed" => Some(Self::Departed),
            "broken" => Some(Self::Broken),
            _ => None,
        }
    }
}

/// An event dispatched by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Install,
    Start,
    ConfigChanged,
    UpgradeCharm,
    UpdateStatus,
    LeaderElected,
    /// The workload container's process manager is reachable
    PebbleReady,
    Relation {
        relation: RelationRef,
        phase: RelationPhase,
    },
    /// `show-config` action
    ShowConfig,
}

impl HookEvent {
    /// Parse a dispatch path such as `hooks/probes-relation-changed`.
    ///
    /// `relation_id` is the host's `endpoint:id` relation reference and is
    /// required for relation events.
    pub fn from_dispatch_path(path: &str, relation_id: Option<&str>) -> Result<Self> {
        let (kind, name) = path
            .trim_matches('/')
            .split_once('/')
            .ok_or_else(|| OperatorError::UnsupportedEvent(path.to_string()))?;

        match kind {
            "actions" => match name {
                "show-config" => Ok(HookEvent::ShowConfig),
                _ => Err(OperatorError::UnsupportedEvent(path.to_string())),
            },
            "hooks" => Self::from_hook_name(name, relation_id),
            _ => Err(OperatorError::UnsupportedEvent(path.to_string())),
        }
    }

    fn from_hook_name(name: &str, relation_id: Option<&str>) -> Result<Self> {
        let event = match name {
            "install" => HookEvent::Install,
            "start" => HookEvent::Start,
            "config-changed" => HookEvent::ConfigChanged,
            "upgrade-charm" => HookEvent::UpgradeCharm,
            "update-status" => HookEvent::UpdateStatus,
            "leader-elected" => HookEvent::LeaderElected,
            _ if name == format!("{}-pebble-ready", CONTAINER_NAME) => HookEvent::PebbleReady,
            _ => {
                let (endpoint, phase) = name
                    .rsplit_once("-relation-")
                    .and_then(|(endpoint, suffix)| {
                        RelationPhase::from_suffix(suffix).map(|phase| (endpoint, phase))
                    })
                    .ok_or_else(|| OperatorError::UnsupportedEvent(name.to_string()))?;
                let id = parse_relation_id(endpoint, relation_id)?;
                HookEvent::Relation {
                    relation: RelationRef::new(id, endpoint),
                    phase,
                }
            }
        };
        Ok(event)
    }

    /// Trigger handed to the probes provider and requirer
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            HookEvent::ConfigChanged => Some(Trigger::ConfigChanged),
            HookEvent::LeaderElected => Some(Trigger::LeaderElected),
            HookEvent::UpgradeCharm | HookEvent::UpdateStatus => Some(Trigger::Refresh),
            HookEvent::Relation { relation, phase } => match phase {
                RelationPhase::Joined => Some(Trigger::RelationJoined(relation.clone())),
                RelationPhase::Changed => Some(Trigger::RelationChanged(relation.clone())),
                RelationPhase::Departed | RelationPhase::Broken => {
                    Some(Trigger::RelationDeparted(relation.clone()))
                }
                RelationPhase::Created => None,
            },
            HookEvent::Install
            | HookEvent::Start
            | HookEvent::PebbleReady
            | HookEvent::ShowConfig => None,
        }
    }

    /// Whether the event runs the full reconciliation on its own. Probes
    /// relation events reconcile only when the merged targets changed; a
    /// metrics endpoint joining or changing gets the scrape jobs right away.
    pub fn reconciles(&self) -> bool {
        match self {
            HookEvent::ConfigChanged
            | HookEvent::PebbleReady
            | HookEvent::UpdateStatus
            | HookEvent::UpgradeCharm
            | HookEvent::LeaderElected => true,
            HookEvent::Relation { relation, phase } => match relation.name.as_str() {
                INGRESS_RELATION => true,
                METRICS_ENDPOINT_RELATION => {
                    matches!(phase, RelationPhase::Joined | RelationPhase::Changed)
                }
                _ => false,
            },
            HookEvent::Install | HookEvent::Start | HookEvent::ShowConfig => false,
        }
    }

    /// Whether resource limits should be (re)applied
    pub fn patches_resources(&self) -> bool {
        matches!(
            self,
            HookEvent::Install | HookEvent::ConfigChanged | HookEvent::UpgradeCharm
        )
    }

    /// Whether the workload version should be refreshed
    pub fn refreshes_version(&self) -> bool {
        matches!(self, HookEvent::PebbleReady | HookEvent::UpgradeCharm)
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookEvent::Install => f.write_str("install"),
            HookEvent::Start => f.write_str("start"),
            HookEvent::ConfigChanged => f.write_str("config-changed"),
            HookEvent::UpgradeCharm => f.write_str("upgrade-charm"),
            HookEvent::UpdateStatus => f.write_str("update-status"),
            HookEvent::LeaderElected => f.write_str("leader-elected"),
            HookEvent::PebbleReady => write!(f, "{}-pebble-ready", CONTAINER_NAME),
            HookEvent::Relation { relation, phase } => {
                let suffix = match phase {
                    RelationPhase::Created => "created",
                    RelationPhase::Joined => "joined",
                    RelationPhase::Changed => "changed",
                    RelationPhase::Departed => "departed",
                    RelationPhase::Broken => "broken",
                };
                write!(f, "{}-relation-{}", relation.name, suffix)
            }
            HookEvent::ShowConfig => f.write_str("show-config"),
        }
    }
}

/// Parse `endpoint:id` (or a bare id) into a relation id
fn parse_relation_id(endpoint: &str, raw: Option<&str>) -> Result<RelationId> {
    let raw = raw.ok_or_else(|| {
        OperatorError::UnsupportedEvent(format!(
            "relation event on '{}' without relation id",
            endpoint
        ))
    })?;
    let id = raw.rsplit(':').next().unwrap_or(raw);
    id.parse::<u32>()
        .map(RelationId)
        .map_err(|_| OperatorError::UnsupportedEvent(format!("invalid relation id '{}'", raw)))
}
