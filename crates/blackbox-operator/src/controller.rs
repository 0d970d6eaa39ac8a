//! Blackbox Exporter Controller
//!
//! Every host event ends in the same idempotent reconciliation pass: wait
//! for resource limits and the workload container, render the exporter
//! configuration with the modules related applications published, publish
//! the resulting scrape jobs and reload the exporter.

use crate::config::{
    CharmConfig, CONFIG_PATH, EXPORTER_PORT, INGRESS_RELATION, METRICS_ENDPOINT_RELATION,
    PROBES_RELATION,
};
use crate::error::{OperatorError, Result};
use crate::event::HookEvent;
use crate::resources::{resource_requirements, ResourcePatcher};
use crate::workload::Workload;
use blackbox_probes::event::RelationRef;
use blackbox_probes::probe::Modules;
use blackbox_probes::relation::{Databag, RelationStore, Scope, SCRAPE_METADATA_KEY};
use blackbox_probes::requirer::{ProbesRequirer, TargetsChangedSink};
use blackbox_probes::scrape::{ScrapeConfigBuilder, ScrapeJob};
use blackbox_probes::topology::Topology;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Databag key carrying the published scrape jobs
pub const SCRAPE_JOBS_KEY: &str = "scrape_jobs";

/// Databag key the ingress provider publishes its URL under
pub const INGRESS_KEY: &str = "ingress";

pub const PATCH_WAITING: &str = "Waiting for resource limit patch to apply";
pub const POD_STARTUP: &str = "Waiting for pod startup to complete";

/// Status reported for the local unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Blocked(String),
    Waiting(String),
    Maintenance(String),
}

impl UnitStatus {
    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active => "",
            UnitStatus::Blocked(m) | UnitStatus::Waiting(m) | UnitStatus::Maintenance(m) => m,
        }
    }
}

/// Result of the `show-config` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowConfig {
    pub path: String,
    pub content: String,
}

/// Facts about the local unit for one dispatch
#[derive(Debug, Clone)]
pub struct ControllerContext {
    pub config: CharmConfig,
    pub topology: Topology,
    pub is_leader: bool,
    /// Overrides the URL published on the ingress relation
    pub ingress_url: Option<String>,
    /// Fully qualified name of the unit's pod
    pub hostname: String,
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("blackbox_operator_reconciliations_total"),
            errors: metrics::counter!("blackbox_operator_reconciliation_errors_total"),
            duration: metrics::histogram!("blackbox_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembers that the probes requirer asked for a reconciliation
#[derive(Debug, Default)]
pub struct PendingReconcile {
    pending: AtomicBool,
}

impl PendingReconcile {
    /// Clear and return the flag
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

impl TargetsChangedSink for PendingReconcile {
    fn targets_changed(&self, relation: Option<&RelationRef>) {
        debug!(relation = ?relation.map(|r| r.id), "Reconciliation requested by probes relation");
        self.pending.store(true, Ordering::SeqCst);
    }
}

/// Drives the exporter workload from configuration and relation data
pub struct BlackboxController {
    ctx: ControllerContext,
    store: Arc<dyn RelationStore>,
    workload: Arc<dyn Workload>,
    patcher: Option<Arc<dyn ResourcePatcher>>,
    requirer: ProbesRequirer,
    pending: Arc<PendingReconcile>,
    metrics: ControllerMetrics,
    status: Option<UnitStatus>,
    workload_version: Option<String>,
}

impl BlackboxController {
    pub fn new(
        ctx: ControllerContext,
        store: Arc<dyn RelationStore>,
        workload: Arc<dyn Workload>,
    ) -> Self {
        let pending = Arc::new(PendingReconcile::default());
        let requirer = ProbesRequirer::new(store.clone(), pending.clone())
            .with_relation_name(PROBES_RELATION);
        Self {
            ctx,
            store,
            workload,
            patcher: None,
            requirer,
            pending,
            metrics: ControllerMetrics::new(),
            status: None,
            workload_version: None,
        }
    }

    /// Apply resource limits through `patcher`
    pub fn with_patcher(mut self, patcher: Arc<dyn ResourcePatcher>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    /// Restore what a previous dispatch observed
    pub fn with_previous(
        mut self,
        observed_probes: Option<String>,
        status: Option<UnitStatus>,
        workload_version: Option<String>,
    ) -> Self {
        self.requirer = self.requirer.with_last_observed(observed_probes);
        self.status = status;
        self.workload_version = workload_version;
        self
    }

    pub fn status(&self) -> Option<&UnitStatus> {
        self.status.as_ref()
    }

    pub fn observed_probes(&self) -> Option<String> {
        self.requirer.last_observed().map(str::to_string)
    }

    pub fn workload_version(&self) -> Option<&str> {
        self.workload_version.as_deref()
    }

    /// Handle one host event
    #[instrument(skip_all, fields(event = %event))]
    pub async fn dispatch(&mut self, event: &HookEvent) -> Option<&UnitStatus> {
        if event.patches_resources() {
            self.apply_resource_limits().await;
        }

        if event.refreshes_version() {
            match self.workload.version().await {
                Some(version) => {
                    info!(version = %version, "Workload version");
                    self.workload_version = Some(version);
                }
                None => debug!("Cannot set workload version at this time"),
            }
        }

        if let Some(trigger) = event.trigger() {
            self.requirer.handle(&trigger);
        }

        let requested = self.pending.take();
        if event.reconciles() || requested {
            self.reconcile().await;
        }

        self.status.as_ref()
    }

    /// Run the common reconciliation pass and record its status
    #[instrument(skip(self))]
    pub async fn reconcile(&mut self) -> UnitStatus {
        let start = Instant::now();
        self.metrics.reconciliations.increment(1);

        let status = match self.try_reconcile().await {
            Ok(status) => status,
            Err(OperatorError::ContainerNotReady(reason)) => {
                debug!(reason = %reason, "Workload container went away");
                UnitStatus::Maintenance(POD_STARTUP.to_string())
            }
            Err(e) => {
                self.metrics.errors.increment(1);
                if e.is_blocking() {
                    warn!(error = %e, "Reconciliation blocked");
                } else {
                    error!(error = %e, "Reconciliation failed");
                }
                UnitStatus::Blocked(e.to_string())
            }
        };

        self.metrics.duration.record(start.elapsed().as_secs_f64());
        info!(status = ?status, "Reconciliation complete");
        self.status = Some(status.clone());
        status
    }

    async fn try_reconcile(&self) -> Result<UnitStatus> {
        if !self.resource_patch_ready().await? {
            // A failed patch already reported why it is blocked.
            return Ok(match &self.status {
                Some(status) if !status.message().is_empty() && *status != UnitStatus::Active => {
                    status.clone()
                }
                _ => UnitStatus::Waiting(PATCH_WAITING.to_string()),
            });
        }

        if !self.workload.is_ready().await {
            return Ok(UnitStatus::Maintenance(POD_STARTUP.to_string()));
        }

        let external_url = self.external_url();
        if !is_valid_external_url(&external_url) {
            error!(url = %external_url, "Invalid external url; must include scheme and hostname");
            return Ok(UnitStatus::Blocked(format!(
                "Invalid external url: '{}'; must include scheme and hostname.",
                external_url
            )));
        }

        // Probes file errors must surface before the workload config is touched.
        let jobs = self.scrape_jobs(&external_url)?;

        let base = self.workload.build_config().await?;
        let config = update_config_from_relation(&self.requirer.modules(), base);
        self.workload.push_config(&config).await?;

        if self.ctx.is_leader {
            self.publish_scrape_jobs(&jobs)?;
        }

        self.workload.update_layer().await?;
        self.workload.reload().await?;

        Ok(UnitStatus::Active)
    }

    async fn apply_resource_limits(&mut self) {
        let Some(patcher) = &self.patcher else {
            return;
        };
        let result = match resource_requirements(
            self.ctx.config.cpu_limit(),
            self.ctx.config.memory_limit(),
        ) {
            Ok(requirements) => patcher.apply(&requirements).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to apply resource limits");
            self.status = Some(UnitStatus::Blocked(e.to_string()));
        }
    }

    async fn resource_patch_ready(&self) -> Result<bool> {
        let Some(patcher) = &self.patcher else {
            return Ok(true);
        };
        let requirements =
            resource_requirements(self.ctx.config.cpu_limit(), self.ctx.config.memory_limit())?;
        match patcher.is_ready(&requirements).await {
            Ok(ready) => Ok(ready),
            Err(e) => {
                warn!(error = %e, "Cannot determine resource patch state");
                Ok(false)
            }
        }
    }

    /// In-cluster address of the exporter
    pub fn internal_url(&self) -> String {
        internal_url(&self.ctx)
    }

    /// Address reachable from outside the cluster, falling back to the
    /// internal one
    pub fn external_url(&self) -> String {
        resolve_external_url(&self.ctx, self.store.as_ref())
    }

    /// Self-monitoring job followed by the probes jobs
    pub fn scrape_jobs(&self, external_url: &str) -> Result<Vec<ScrapeJob>> {
        let builder = ScrapeConfigBuilder::new(external_url)?;
        let mut jobs = vec![builder.self_scraping_job()];
        jobs.extend(self.probes_scraping_jobs(&builder)?);
        Ok(jobs)
    }

    /// Jobs for the configured probes file and the related applications'
    /// probes
    pub fn probes_scraping_jobs(&self, builder: &ScrapeConfigBuilder) -> Result<Vec<ScrapeJob>> {
        Ok(builder
            .build_probes_scraping_jobs(&self.ctx.config.probes_file, &self.requirer.probes())?)
    }

    fn publish_scrape_jobs(&self, jobs: &[ScrapeJob]) -> Result<()> {
        let mut record = Databag::new();
        record.insert(SCRAPE_JOBS_KEY.to_string(), serde_json::to_string(jobs)?);
        record.insert(
            SCRAPE_METADATA_KEY.to_string(),
            self.ctx.topology.as_metadata()?,
        );

        let scope = Scope::App(self.ctx.topology.application.clone());
        for relation in self.store.relations(METRICS_ENDPOINT_RELATION) {
            if self.store.write(relation.id, &scope, record.clone())? {
                info!(relation_id = %relation.id, jobs = jobs.len(), "Published scrape jobs");
            }
        }
        Ok(())
    }

    /// Content of the exporter configuration file
    pub async fn show_config(&self) -> Result<ShowConfig> {
        if !self.workload.is_ready().await {
            return Err(OperatorError::ContainerNotReady("Container not ready".to_string()));
        }
        Ok(ShowConfig {
            path: CONFIG_PATH.to_string(),
            content: self.workload.read_config().await?,
        })
    }
}

fn internal_url(ctx: &ControllerContext) -> String {
    format!("http://{}:{}", ctx.hostname, EXPORTER_PORT)
}

/// Ingress URL if one is known, otherwise the in-cluster address
pub fn resolve_external_url(ctx: &ControllerContext, store: &dyn RelationStore) -> String {
    ingress_url(ctx, store).unwrap_or_else(|| internal_url(ctx))
}

fn ingress_url(ctx: &ControllerContext, store: &dyn RelationStore) -> Option<String> {
    if let Some(url) = ctx.ingress_url.as_ref().filter(|u| !u.is_empty()) {
        return Some(url.clone());
    }
    store
        .relations(INGRESS_RELATION)
        .into_iter()
        .find_map(|relation| {
            let app = relation.remote_app?;
            let raw = store.read(relation.id, &Scope::App(app)).remove(INGRESS_KEY)?;
            let data: Value = serde_json::from_str(&raw)
                .map_err(|e| warn!(error = %e, "Malformed ingress data"))
                .ok()?;
            data.get("url").and_then(Value::as_str).map(str::to_string)
        })
}

/// Only plain `http` URLs with a host are served
fn is_valid_external_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.scheme() == "http" && u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Merge relation modules into the exporter configuration; relation
/// modules replace configured ones of the same name
pub fn update_config_from_relation(modules: &Modules, mut config: Value) -> Value {
    if modules.is_empty() {
        return config;
    }
    let Value::Object(root) = &mut config else {
        return config;
    };
    let section = root
        .entry("modules")
        .or_insert_with(|| Value::Object(Default::default()));
    if !section.is_object() {
        *section = Value::Object(Default::default());
    }
    if let Value::Object(section) = section {
        for (name, module) in modules {
            section.insert(name.clone(), Value::Object(module.clone()));
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RelationPhase;
    use crate::workload::{default_config, INVALID_YAML};
    use async_trait::async_trait;
    use blackbox_probes::relation::{InMemoryRelationStore, Relation, RelationId};
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use serde_json::json;
    use std::sync::Mutex;

    const UUID: &str = "12de4fae-06cc-4ceb-9089-567be09fec78";

    #[derive(Default)]
    struct FakeWorkload {
        not_ready: bool,
        config_file: String,
        pushed: Mutex<Vec<Value>>,
        reloads: Mutex<usize>,
        version: Option<String>,
    }

    #[async_trait]
    impl Workload for FakeWorkload {
        async fn is_ready(&self) -> bool {
            !self.not_ready
        }

        async fn build_config(&self) -> Result<Value> {
            if self.config_file.is_empty() {
                return Ok(default_config());
            }
            serde_yaml::from_str(&self.config_file)
                .map_err(|_| OperatorError::ConfigUpdateFailure(INVALID_YAML.to_string()))
        }

        async fn push_config(&self, config: &Value) -> Result<bool> {
            self.pushed.lock().unwrap().push(config.clone());
            Ok(true)
        }

        async fn update_layer(&self) -> Result<()> {
            Ok(())
        }

        async fn reload(&self) -> Result<()> {
            *self.reloads.lock().unwrap() += 1;
            Ok(())
        }

        async fn read_config(&self) -> Result<String> {
            Ok("modules: {}\n".to_string())
        }

        async fn version(&self) -> Option<String> {
            self.version.clone()
        }
    }

    struct FakePatcher {
        ready: AtomicBool,
        fail: bool,
    }

    #[async_trait]
    impl ResourcePatcher for FakePatcher {
        async fn apply(&self, _requirements: &ResourceRequirements) -> Result<()> {
            if self.fail {
                return Err(OperatorError::ResourcePatch("forbidden".to_string()));
            }
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn is_ready(&self, _requirements: &ResourceRequirements) -> Result<bool> {
            Ok(self.ready.load(Ordering::SeqCst))
        }
    }

    fn context(config: CharmConfig, is_leader: bool) -> ControllerContext {
        ControllerContext {
            config,
            topology: Topology::new("lma", UUID, "blackbox").unwrap(),
            is_leader,
            ingress_url: None,
            hostname: "blackbox-0.blackbox-endpoints.lma.svc.cluster.local".to_string(),
        }
    }

    fn store_with_relations() -> Arc<InMemoryRelationStore> {
        let store = Arc::new(InMemoryRelationStore::new());
        store.add_relation(Relation {
            id: RelationId(1),
            name: PROBES_RELATION.to_string(),
            remote_app: Some("web".to_string()),
            remote_units: vec!["web/0".to_string()],
        });
        store.add_relation(Relation {
            id: RelationId(2),
            name: METRICS_ENDPOINT_RELATION.to_string(),
            remote_app: Some("prometheus".to_string()),
            remote_units: vec!["prometheus/0".to_string()],
        });
        store
    }

    fn publish_probes(store: &InMemoryRelationStore) {
        let topology = Topology::new("lma", UUID, "web").unwrap();
        let probes = json!([{
            "job_name": topology.prefixed("site"),
            "params": {"module": [topology.prefixed("http_slow")]},
            "static_configs": [{"targets": ["10.1.238.1"]}]
        }]);
        let modules = json!({topology.prefixed("http_slow"): {"prober": "http", "timeout": "30s"}});
        let mut bag = Databag::new();
        bag.insert(SCRAPE_METADATA_KEY.to_string(), topology.as_metadata().unwrap());
        bag.insert("scrape_probes".to_string(), probes.to_string());
        bag.insert("scrape_modules".to_string(), modules.to_string());
        store.set_databag(RelationId(1), Scope::App("web".to_string()), bag);
    }

    fn probes_changed() -> HookEvent {
        HookEvent::Relation {
            relation: RelationRef::new(RelationId(1), PROBES_RELATION),
            phase: RelationPhase::Changed,
        }
    }

    fn published_jobs(store: &InMemoryRelationStore) -> Option<Vec<ScrapeJob>> {
        let bag = store.read(RelationId(2), &Scope::App("blackbox".to_string()));
        bag.get(SCRAPE_JOBS_KEY)
            .map(|raw| serde_json::from_str(raw).unwrap())
    }

    #[tokio::test]
    async fn test_config_changed_reaches_active() {
        let store = store_with_relations();
        let workload = Arc::new(FakeWorkload::default());
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store.clone(),
            workload.clone(),
        );

        let status = controller.dispatch(&HookEvent::ConfigChanged).await.cloned();

        assert_eq!(status, Some(UnitStatus::Active));
        assert_eq!(workload.pushed.lock().unwrap()[0], default_config());
        assert_eq!(*workload.reloads.lock().unwrap(), 1);

        let jobs = published_jobs(&store).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].metrics_path, "/metrics");
        assert_eq!(
            jobs[0].static_configs[0].targets,
            vec!["blackbox-0.blackbox-endpoints.lma.svc.cluster.local:9115".to_string()]
        );
    }

    #[tokio::test]
    async fn test_probes_relation_change_merges_modules_and_jobs() {
        let store = store_with_relations();
        let workload = Arc::new(FakeWorkload::default());
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store.clone(),
            workload.clone(),
        );

        publish_probes(&store);
        let status = controller.dispatch(&probes_changed()).await.cloned();
        assert_eq!(status, Some(UnitStatus::Active));

        let pushed = workload.pushed.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            pushed["modules"]["juju_lma_12de4fae_web_http_slow"]["timeout"],
            "30s"
        );
        assert!(pushed["modules"]["http_2xx"].is_object());

        let jobs = published_jobs(&store).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].job_name.as_deref(), Some("juju_lma_12de4fae_web_site"));
        assert_eq!(jobs[1].metrics_path, "/probe");

        // The same content again does not reconcile.
        controller.dispatch(&probes_changed()).await;
        assert_eq!(workload.pushed.lock().unwrap().len(), 1);
        assert!(controller.observed_probes().is_some());
    }

    #[tokio::test]
    async fn test_probes_relation_without_data_does_not_reconcile() {
        let store = store_with_relations();
        let workload = Arc::new(FakeWorkload::default());
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store,
            workload.clone(),
        );

        assert_eq!(controller.dispatch(&probes_changed()).await, None);
        assert!(workload.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_leader_does_not_publish_jobs() {
        let store = store_with_relations();
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), false),
            store.clone(),
            Arc::new(FakeWorkload::default()),
        );
        controller.dispatch(&HookEvent::UpdateStatus).await;
        assert_eq!(published_jobs(&store), None);
    }

    #[tokio::test]
    async fn test_waits_for_pod_startup() {
        let workload = Arc::new(FakeWorkload {
            not_ready: true,
            ..Default::default()
        });
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store_with_relations(),
            workload,
        );
        assert_eq!(
            controller.reconcile().await,
            UnitStatus::Maintenance(POD_STARTUP.to_string())
        );
        assert!(matches!(
            controller.show_config().await,
            Err(OperatorError::ContainerNotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_resource_patch_gates_reconciliation() {
        let patcher = Arc::new(FakePatcher {
            ready: AtomicBool::new(false),
            fail: false,
        });
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store_with_relations(),
            Arc::new(FakeWorkload::default()),
        )
        .with_patcher(patcher.clone());

        assert_eq!(
            controller.dispatch(&HookEvent::UpdateStatus).await,
            Some(&UnitStatus::Waiting(PATCH_WAITING.to_string()))
        );
        assert_eq!(
            controller.dispatch(&HookEvent::ConfigChanged).await,
            Some(&UnitStatus::Active)
        );
    }

    #[tokio::test]
    async fn test_failed_patch_stays_blocked() {
        let patcher = Arc::new(FakePatcher {
            ready: AtomicBool::new(false),
            fail: true,
        });
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store_with_relations(),
            Arc::new(FakeWorkload::default()),
        )
        .with_patcher(patcher);

        let status = controller.dispatch(&HookEvent::ConfigChanged).await.cloned();
        assert!(matches!(status, Some(UnitStatus::Blocked(m)) if m.contains("forbidden")));
    }

    #[tokio::test]
    async fn test_invalid_external_url_blocks() {
        let mut ctx = context(CharmConfig::default(), true);
        ctx.ingress_url = Some("https://ingress.example/blackbox".to_string());
        let mut controller = BlackboxController::new(
            ctx,
            store_with_relations(),
            Arc::new(FakeWorkload::default()),
        );
        assert_eq!(
            controller.reconcile().await,
            UnitStatus::Blocked(format!(
                "Invalid external url: '{}'; must include scheme and hostname.",
                "https://ingress.example/blackbox"
            ))
        );
    }

    #[test]
    fn test_ingress_relation_url_is_used() {
        let store = store_with_relations();
        store.add_relation(Relation {
            id: RelationId(3),
            name: INGRESS_RELATION.to_string(),
            remote_app: Some("traefik".to_string()),
            remote_units: vec![],
        });
        let mut bag = Databag::new();
        bag.insert(
            INGRESS_KEY.to_string(),
            json!({"url": "http://ingress.example/lma-blackbox"}).to_string(),
        );
        store.set_databag(RelationId(3), Scope::App("traefik".to_string()), bag);

        let controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store.clone(),
            Arc::new(FakeWorkload::default()),
        );
        assert_eq!(controller.external_url(), "http://ingress.example/lma-blackbox");

        let jobs = controller.scrape_jobs(&controller.external_url()).unwrap();
        assert_eq!(jobs[0].metrics_path, "/lma-blackbox/metrics");
    }

    #[tokio::test]
    async fn test_invalid_config_file_blocks() {
        let workload = Arc::new(FakeWorkload {
            config_file: "modules: [".to_string(),
            ..Default::default()
        });
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store_with_relations(),
            workload.clone(),
        );
        assert_eq!(
            controller.reconcile().await,
            UnitStatus::Blocked(INVALID_YAML.to_string())
        );
        assert!(workload.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_probes_file_blocks() {
        let config = CharmConfig {
            probes_file: "scrape_configs: [".to_string(),
            ..Default::default()
        };
        let store = store_with_relations();
        let workload = Arc::new(FakeWorkload::default());
        let mut controller =
            BlackboxController::new(context(config, true), store.clone(), workload.clone());

        let status = controller.reconcile().await;
        assert!(matches!(
            &status,
            UnitStatus::Blocked(m) if m.starts_with("Failed to parse probes file")
        ));
        assert!(workload.pushed.lock().unwrap().is_empty());
        assert_eq!(*workload.reloads.lock().unwrap(), 0);
        assert_eq!(published_jobs(&store), None);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_join_publishes_jobs() {
        let store = store_with_relations();
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store.clone(),
            Arc::new(FakeWorkload::default()),
        );
        let joined = HookEvent::Relation {
            relation: RelationRef::new(RelationId(2), METRICS_ENDPOINT_RELATION),
            phase: RelationPhase::Joined,
        };

        let status = controller.dispatch(&joined).await.cloned();
        assert_eq!(status, Some(UnitStatus::Active));
        let jobs = published_jobs(&store).unwrap();
        assert_eq!(jobs[0].metrics_path, "/metrics");
    }

    #[tokio::test]
    async fn test_version_on_pebble_ready() {
        let workload = Arc::new(FakeWorkload {
            version: Some("0.24.0".to_string()),
            ..Default::default()
        });
        let mut controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store_with_relations(),
            workload,
        );
        controller.dispatch(&HookEvent::PebbleReady).await;
        assert_eq!(controller.workload_version(), Some("0.24.0"));
    }

    #[tokio::test]
    async fn test_show_config() {
        let controller = BlackboxController::new(
            context(CharmConfig::default(), true),
            store_with_relations(),
            Arc::new(FakeWorkload::default()),
        );
        let result = controller.show_config().await.unwrap();
        assert_eq!(result.path, CONFIG_PATH);
        assert_eq!(result.content, "modules: {}\n");
    }

    #[test]
    fn test_update_config_from_relation() {
        let mut modules = Modules::new();
        modules.insert(
            "juju_x_http".to_string(),
            json!({"prober": "http"}).as_object().cloned().unwrap(),
        );

        let merged = update_config_from_relation(&modules, json!({"other": 1}));
        assert_eq!(merged["modules"]["juju_x_http"]["prober"], "http");
        assert_eq!(merged["other"], 1);

        let untouched = update_config_from_relation(&Modules::new(), json!({"other": 1}));
        assert_eq!(untouched, json!({"other": 1}));
    }

    #[test]
    fn test_external_url_validation() {
        assert!(is_valid_external_url("http://host:9115"));
        assert!(is_valid_external_url("http://host/prefix"));
        assert!(!is_valid_external_url("https://host"));
        assert!(!is_valid_external_url("host:9115"));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(UnitStatus::Blocked("x".to_string())).unwrap(),
            json!({"state": "blocked", "message": "x"})
        );
        assert_eq!(
            serde_json::to_value(UnitStatus::Active).unwrap(),
            json!({"state": "active"})
        );
    }
}
