//! State carried between dispatches
//!
//! Every host event runs the operator as a fresh process. Relation content
//! and the last observed probes fingerprint survive in a JSON state file.

use crate::controller::UnitStatus;
use crate::error::Result;
use blackbox_probes::relation::RelationSnapshot;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchState {
    /// Relations and their databags as seen by this unit
    #[serde(default)]
    pub relations: RelationSnapshot,

    /// Fingerprint of the probes relation content last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_probes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UnitStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_version: Option<String>,
}

impl DispatchState {
    /// Load the state; a missing file yields an empty state
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state file, starting empty");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
