//! End-to-end tests for the probes relation protocol
//!
//! Providers publish through a shared in-memory relation store and a
//! requirer on the exporter side reads the merged result.

use blackbox_probes::prelude::*;
use serde_json::json;
use std::sync::Arc;

const UUID: &str = "00000000-0000-4000-8000-000000000000";
const EXPORTER_APP: &str = "blackbox";

fn modules() -> Modules {
    let mut modules = Modules::new();
    modules.insert(
        "http_2xx_longer_timeout".to_string(),
        json!({"prober": "http", "timeout": "30s"})
            .as_object()
            .cloned()
            .unwrap(),
    );
    modules
}

fn first_job() -> Probe {
    Probe::new("my-first-job", "http_2xx", ["10.1.238.1"]).with_label("some_key", "some-value")
}

/// Relate a provider application to the exporter and return a provider that
/// sees only that relation
fn relate_provider(
    exporter_store: &Arc<InMemoryRelationStore>,
    id: u32,
    topology: Topology,
    probes: Vec<Probe>,
    modules: Modules,
) -> (Arc<InMemoryRelationStore>, ProbesProvider) {
    exporter_store.add_relation(Relation {
        id: RelationId(id),
        name: DEFAULT_RELATION_NAME.to_string(),
        remote_app: Some(topology.application.clone()),
        remote_units: vec![format!("{}/0", topology.application)],
    });

    let provider_store = Arc::new(InMemoryRelationStore::new());
    provider_store.add_relation(Relation {
        id: RelationId(id),
        name: DEFAULT_RELATION_NAME.to_string(),
        remote_app: Some(EXPORTER_APP.to_string()),
        remote_units: vec![format!("{}/0", EXPORTER_APP)],
    });
    let provider = ProbesProvider::new(provider_store.clone(), topology, probes, modules);
    (provider_store, provider)
}

/// Copy what a provider wrote into the exporter's view of the relation
fn sync(
    provider_store: &InMemoryRelationStore,
    exporter_store: &InMemoryRelationStore,
    id: u32,
    app: &str,
) {
    let scope = Scope::App(app.to_string());
    let data = provider_store.read(RelationId(id), &scope);
    exporter_store.set_databag(RelationId(id), scope, data);
}

#[test]
fn test_published_probe_is_prefixed_on_requirer_side() {
    let exporter_store = Arc::new(InMemoryRelationStore::new());
    let topology = Topology::new("lma", UUID, "web").unwrap();
    let identifier = topology.identifier();
    let (provider_store, mut provider) =
        relate_provider(&exporter_store, 1, topology, vec![first_job()], modules());

    provider.publish(true).unwrap();
    sync(&provider_store, &exporter_store, 1, "web");

    let requirer = ProbesRequirer::new(exporter_store.clone(), Arc::new(CountingSink::new()));
    let probes = requirer.probes();

    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].job_name, format!("juju_{}_my-first-job", identifier));
    assert_eq!(probes[0].params, first_job().params);
    assert_eq!(probes[0].static_configs, first_job().static_configs);

    let modules = requirer.modules();
    assert!(modules.contains_key(&format!("juju_{}_http_2xx_longer_timeout", identifier)));
}

#[test]
fn test_identical_topologies_merge_into_one_probe() {
    let exporter_store = Arc::new(InMemoryRelationStore::new());
    let topology = Topology::new("lma", UUID, "web").unwrap();

    let (store_a, mut provider_a) =
        relate_provider(&exporter_store, 1, topology.clone(), vec![first_job()], modules());
    provider_a.publish(true).unwrap();
    sync(&store_a, &exporter_store, 1, "web");

    // A second relation to the same application publishes the same record.
    let (store_b, mut provider_b) =
        relate_provider(&exporter_store, 2, topology, vec![first_job()], modules());
    provider_b.publish(true).unwrap();
    sync(&store_b, &exporter_store, 2, "web");

    let requirer = ProbesRequirer::new(exporter_store, Arc::new(CountingSink::new()));
    assert_eq!(requirer.probes().len(), 1);
    assert_eq!(requirer.modules().len(), 1);
}

#[test]
fn test_distinct_applications_keep_both_jobs() {
    let exporter_store = Arc::new(InMemoryRelationStore::new());

    let (store_a, mut provider_a) = relate_provider(
        &exporter_store,
        1,
        Topology::new("lma", UUID, "web").unwrap(),
        vec![first_job()],
        modules(),
    );
    let (store_b, mut provider_b) = relate_provider(
        &exporter_store,
        2,
        Topology::new("lma", UUID, "api").unwrap(),
        vec![first_job()],
        modules(),
    );
    provider_a.publish(true).unwrap();
    provider_b.publish(true).unwrap();
    sync(&store_a, &exporter_store, 1, "web");
    sync(&store_b, &exporter_store, 2, "api");

    let requirer = ProbesRequirer::new(exporter_store, Arc::new(CountingSink::new()));
    let names: Vec<String> = requirer.probes().into_iter().map(|p| p.job_name).collect();

    assert_eq!(
        names,
        vec![
            "juju_lma_00000000_web_my-first-job".to_string(),
            "juju_lma_00000000_api_my-first-job".to_string(),
        ]
    );
    assert_eq!(requirer.modules().len(), 2);
}

#[test]
fn test_malformed_publication_leaves_relation_untouched() {
    let exporter_store = Arc::new(InMemoryRelationStore::new());
    let mut broken = first_job();
    broken.static_configs.clear();
    let (provider_store, mut provider) = relate_provider(
        &exporter_store,
        1,
        Topology::new("lma", UUID, "web").unwrap(),
        vec![broken],
        modules(),
    );

    assert_eq!(provider.publish(true).unwrap(), PublishOutcome::Blocked);
    assert_eq!(
        provider.status(),
        &ProbesStatus::Blocked(PROBE_CONFIG_ERROR.to_string())
    );
    assert!(provider_store
        .read(RelationId(1), &Scope::App("web".to_string()))
        .is_empty());
}

#[test]
fn test_requirer_view_is_idempotent_and_notifies_once() {
    let exporter_store = Arc::new(InMemoryRelationStore::new());
    let (provider_store, mut provider) = relate_provider(
        &exporter_store,
        1,
        Topology::new("lma", UUID, "web").unwrap(),
        vec![first_job()],
        modules(),
    );
    let sink = Arc::new(CountingSink::new());
    let mut requirer = ProbesRequirer::new(exporter_store.clone(), sink.clone());
    let relation = RelationRef::new(RelationId(1), DEFAULT_RELATION_NAME);

    requirer.handle(&Trigger::RelationJoined(relation.clone()));
    assert_eq!(sink.count(), 0);

    provider.publish(true).unwrap();
    sync(&provider_store, &exporter_store, 1, "web");
    requirer.handle(&Trigger::RelationChanged(relation.clone()));

    // Republishing the same content is invisible to the requirer.
    provider.publish(true).unwrap();
    sync(&provider_store, &exporter_store, 1, "web");
    requirer.handle(&Trigger::RelationChanged(relation));

    assert_eq!(sink.count(), 1);
    assert_eq!(requirer.probes(), requirer.probes());
}

#[test]
fn test_requirer_output_feeds_scrape_builder() {
    let exporter_store = Arc::new(InMemoryRelationStore::new());
    let (provider_store, mut provider) = relate_provider(
        &exporter_store,
        1,
        Topology::new("lma", UUID, "web").unwrap(),
        vec![first_job()],
        modules(),
    );
    provider.publish(true).unwrap();
    sync(&provider_store, &exporter_store, 1, "web");
    let requirer = ProbesRequirer::new(exporter_store, Arc::new(CountingSink::new()));

    let file = "scrape_configs:\n  - job_name: file_job\n    params:\n      module: [icmp]\n    static_configs:\n      - targets: [10.0.0.9]\n";
    let builder = ScrapeConfigBuilder::new("http://blackbox-0.blackbox-endpoints:9115").unwrap();
    let jobs = builder
        .build_probes_scraping_jobs(file, &requirer.probes())
        .unwrap();

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].job_name.as_deref(), Some("file_job"));
    assert_eq!(
        jobs[1].job_name.as_deref(),
        Some("juju_lma_00000000_web_my-first-job")
    );
    assert!(jobs.iter().all(|j| j.metrics_path == "/probe"));
}
