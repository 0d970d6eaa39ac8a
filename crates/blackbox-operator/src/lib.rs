//! # Blackbox Exporter Operator
//!
//! Operates a Prometheus Blackbox Exporter workload on Kubernetes. The host
//! runs the operator once per lifecycle event; each run reconciles the
//! exporter configuration, the scrape jobs published for Prometheus and the
//! workload container's resource limits.
//!
//! ## Features
//!
//! - **Probes relation**: merges probes and modules published by related
//!   applications through [`blackbox_probes`]
//! - **Exporter configuration**: built-in module set or an administrator
//!   supplied file, with relation modules merged in
//! - **Scrape jobs**: self-monitoring and probe jobs published on the metrics
//!   endpoint relation
//! - **Hot reload**: HTTP reload with a service restart fallback
//! - **Resource limits**: CPU and memory limits patched onto the StatefulSet
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blackbox_operator::prelude::*;
//! use std::sync::Arc;
//!
//! let event = HookEvent::from_dispatch_path("hooks/config-changed", None)?;
//! let workload = ExporterWorkload::new("/containers/blackbox", "", "http://localhost:9115")?;
//! let workload = Arc::new(workload);
//! let mut controller = BlackboxController::new(ctx, store, workload);
//! let status = controller.dispatch(&event).await;
//! ```
//!
//! ## Modules
//!
//! - [`event`] - Host events and their dispatch table
//! - [`controller`] - Reconciliation pass and unit status
//! - [`workload`] - Exporter configuration, service layer and reload
//! - [`resources`] - Container resource requirements and StatefulSet patching
//! - [`config`] - Application configuration options
//! - [`state`] - State persisted between dispatches
//! - [`error`] - Error types for operator operations

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod resources;
pub mod state;
pub mod workload;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::config::CharmConfig;
    pub use crate::controller::{
        BlackboxController, ControllerContext, ControllerMetrics, ShowConfig, UnitStatus,
    };
    pub use crate::error::{OperatorError, Result};
    pub use crate::event::{HookEvent, RelationPhase};
    pub use crate::resources::{resource_requirements, KubeResourcePatcher, ResourcePatcher};
    pub use crate::state::DispatchState;
    pub use crate::workload::{ExporterApi, ExporterWorkload, Workload};
}
