//! # Blackbox Exporter probes protocol
//!
//! Applications that want their endpoints probed by a Blackbox Exporter
//! publish probe jobs and prober modules over a `probes` relation. The
//! exporter side merges the records of every related application into its
//! own configuration and scrape jobs.
//!
//! ## Relation record
//!
//! The leader of a providing application writes three keys into its
//! application databag:
//!
//! | Key               | Content                                              |
//! |-------------------|------------------------------------------------------|
//! | `scrape_metadata` | JSON [`Topology`] of the publisher                   |
//! | `scrape_probes`   | JSON list of [`Probe`], `job_name` prefixed          |
//! | `scrape_modules`  | JSON map of module name to settings, name prefixed   |
//!
//! The prefix is `juju_{identifier}_` where the identifier comes from
//! [`Topology::identifier`], so job and module names never collide across
//! publishers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blackbox_probes::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryRelationStore::new());
//! let topology = Topology::new("lma", model_uuid, "my-app")?;
//! let probes = vec![Probe::new("my-first-job", "http_2xx", ["10.1.238.1"])];
//!
//! let mut provider = ProbesProvider::new(store.clone(), topology, probes, Modules::new());
//! provider.publish(true)?;
//!
//! let requirer = ProbesRequirer::new(store, Arc::new(CountingSink::new()));
//! let merged = requirer.probes();
//! ```
//!
//! ## Modules
//!
//! - [`topology`] - Publisher identity and name prefixes
//! - [`probe`] - Probe and module types with structural validation
//! - [`relation`] - Relation store seam and in-memory implementation
//! - [`event`] - Lifecycle triggers
//! - [`provider`] - Validating publisher
//! - [`requirer`] - Merging reader with change notifications
//! - [`scrape`] - Exporter-routed scrape job builder
//! - [`error`] - Error types

pub mod error;
pub mod event;
pub mod probe;
pub mod provider;
pub mod relation;
pub mod requirer;
pub mod scrape;
pub mod topology;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::error::{ProbesError, Result};
    pub use crate::event::{RelationRef, Trigger};
    pub use crate::probe::{
        validate_modules, validate_probe, validate_probes, Module, Modules, Probe, StaticConfig,
    };
    pub use crate::provider::{
        ProbesProvider, ProbesStatus, PublishOutcome, DEFAULT_RELATION_NAME, PROBE_CONFIG_ERROR,
    };
    pub use crate::relation::{
        Databag, InMemoryRelationStore, Relation, RelationId, RelationSnapshot, RelationStore,
        Scope, SCRAPE_METADATA_KEY, SCRAPE_MODULES_KEY, SCRAPE_PROBES_KEY,
    };
    pub use crate::requirer::{CountingSink, ProbesRequirer, TargetsChangedSink};
    pub use crate::scrape::{RelabelConfig, ScrapeConfigBuilder, ScrapeJob};
    pub use crate::topology::Topology;
}
