//! Workload resource limits
//!
//! Builds the container `ResourceRequirements` from the `cpu`/`memory`
//! options and applies them to the application's StatefulSet.

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// CPU always requested for the workload container
pub const CPU_REQUEST: &str = "0.25";

/// Memory always requested for the workload container
pub const MEMORY_REQUEST: &str = "200Mi";

/// Parse a Kubernetes quantity into a plain number (cores or bytes)
pub fn parse_quantity(value: &str) -> Result<f64> {
    let invalid = || OperatorError::InvalidConfig(format!("invalid quantity '{}'", value));
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    let number: f64 = number.parse().map_err(|_| invalid())?;

    let multiplier = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        _ => return Err(invalid()),
    };
    Ok(number * multiplier)
}

/// Requirements for the workload container.
///
/// Requests are fixed; a configured limit below its request is raised to
/// the request.
pub fn resource_requirements(
    cpu: Option<&str>,
    memory: Option<&str>,
) -> Result<ResourceRequirements> {
    let requests: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity(CPU_REQUEST.to_string())),
        ("memory".to_string(), Quantity(MEMORY_REQUEST.to_string())),
    ]
    .into_iter()
    .collect();

    let mut limits = BTreeMap::new();
    for (resource, limit) in [("cpu", cpu), ("memory", memory)] {
        let Some(limit) = limit else { continue };
        let request = &requests[resource].0;
        let effective = if parse_quantity(limit)? < parse_quantity(request)? {
            debug!(resource, limit, request = %request, "Raising limit to match request");
            request.clone()
        } else {
            limit.to_string()
        };
        limits.insert(resource.to_string(), Quantity(effective));
    }

    Ok(ResourceRequirements {
        limits: (!limits.is_empty()).then_some(limits),
        requests: Some(requests),
        ..Default::default()
    })
}

/// Whether two requirement sets are equivalent, comparing quantities by value
pub fn requirements_match(live: &ResourceRequirements, desired: &ResourceRequirements) -> bool {
    type Quantities = BTreeMap<String, Quantity>;

    fn same(a: Option<&Quantities>, b: Option<&Quantities>) -> bool {
        let empty = BTreeMap::new();
        let a = a.unwrap_or(&empty);
        let b = b.unwrap_or(&empty);
        a.len() == b.len()
            && a.iter().all(|(key, qa)| {
                b.get(key).is_some_and(|qb| {
                    match (parse_quantity(&qa.0), parse_quantity(&qb.0)) {
                        (Ok(x), Ok(y)) => (x - y).abs() < f64::EPSILON * x.abs().max(1.0),
                        _ => qa.0 == qb.0,
                    }
                })
            })
    }

    same(live.limits.as_ref(), desired.limits.as_ref())
        && same(live.requests.as_ref(), desired.requests.as_ref())
}

/// Applies resource requirements to the running workload
#[async_trait]
pub trait ResourcePatcher: Send + Sync {
    async fn apply(&self, requirements: &ResourceRequirements) -> Result<()>;

    /// Whether the workload already runs with `requirements`
    async fn is_ready(&self, requirements: &ResourceRequirements) -> Result<bool>;
}

/// Patches the workload container of the application's StatefulSet
pub struct KubeResourcePatcher {
    client: Client,
    namespace: String,
    statefulset: String,
    container: String,
}

impl KubeResourcePatcher {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        statefulset: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            statefulset: statefulset.into(),
            container: container.into(),
        }
    }

    fn api(&self) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ResourcePatcher for KubeResourcePatcher {
    #[instrument(skip(self, requirements), fields(statefulset = %self.statefulset))]
    async fn apply(&self, requirements: &ResourceRequirements) -> Result<()> {
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": self.container,
                            "resources": requirements,
                        }]
                    }
                }
            }
        });

        self.api()
            .patch(&self.statefulset, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map_err(|e| OperatorError::ResourcePatch(e.to_string()))?;

        info!(container = %self.container, "Applied resource limits");
        Ok(())
    }

    async fn is_ready(&self, requirements: &ResourceRequirements) -> Result<bool> {
        let statefulset = self.api().get(&self.statefulset).await?;
        let live = statefulset
            .spec
            .and_then(|spec| spec.template.spec)
            .and_then(|pod| pod.containers.into_iter().find(|c| c.name == self.container))
            .and_then(|container| container.resources);

        Ok(live.is_some_and(|live| requirements_match(&live, requirements)))
    }
}
