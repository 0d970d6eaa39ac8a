//! Scrape job construction
//!
//! The exporter multiplexes every prober module behind a single `/probe`
//! endpoint. Prometheus therefore scrapes the exporter, not the probed
//! hosts: each job's targets are moved into the `target` URL parameter by
//! relabeling and the scrape address is rewritten to the exporter itself.

use crate::error::{ProbesError, Result};
use crate::probe::{Probe, StaticConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use url::Url;

/// One Prometheus relabel rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelabelConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,
    pub target_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

impl RelabelConfig {
    fn copy(source: &str, target: &str) -> Self {
        Self {
            source_labels: vec![source.to_string()],
            target_label: target.to_string(),
            replacement: None,
        }
    }

    fn replace(target: &str, replacement: String) -> Self {
        Self {
            source_labels: Vec::new(),
            target_label: target.to_string(),
            replacement: Some(replacement),
        }
    }
}

/// A Prometheus scrape job as published to the metrics endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    pub metrics_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<String>>,
    pub static_configs: Vec<StaticConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relabel_configs: Vec<RelabelConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbesFile {
    #[serde(default)]
    scrape_configs: Vec<Probe>,
}

/// Builds scrape jobs routed through the exporter's external URL
#[derive(Debug, Clone)]
pub struct ScrapeConfigBuilder {
    base_path: String,
    address: String,
}

impl ScrapeConfigBuilder {
    /// Create a builder for an exporter reachable at `external_url`
    pub fn new(external_url: &str) -> Result<Self> {
        let invalid = |reason: &str| ProbesError::InvalidUrl {
            url: external_url.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(external_url).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("missing hostname"))?;
        let address = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            base_path: url.path().trim_end_matches('/').to_string(),
            address,
        })
    }

    /// `host[:port]` Prometheus connects to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Path of the exporter's probe endpoint
    pub fn probe_path(&self) -> String {
        format!("{}/probe", self.base_path)
    }

    /// Job scraping the exporter's own metrics
    pub fn self_scraping_job(&self) -> ScrapeJob {
        ScrapeJob {
            job_name: None,
            metrics_path: format!("{}/metrics", self.base_path),
            params: BTreeMap::new(),
            static_configs: vec![StaticConfig {
                targets: vec![self.address.clone()],
                labels: BTreeMap::new(),
            }],
            relabel_configs: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Combine probes from the static file and from relations into scrape
    /// jobs.
    ///
    /// File jobs come first, then relation jobs, each in input order. A file
    /// job sharing its `job_name` with a relation job is replaced by it.
    /// File jobs are forwarded as written; only a `job_name` is required, so
    /// a job without `params.module` falls back to the exporter's default
    /// module.
    pub fn build_probes_scraping_jobs(
        &self,
        file_probes: &str,
        relation_probes: &[Probe],
    ) -> Result<Vec<ScrapeJob>> {
        let file = parse_probes_file(file_probes)?;
        if let Some(index) = file.scrape_configs.iter().position(|p| p.job_name.is_empty()) {
            return Err(ProbesError::Validation(format!(
                "probes file job {} has no job_name",
                index
            )));
        }

        let relation_names: HashSet<&str> =
            relation_probes.iter().map(|p| p.job_name.as_str()).collect();
        let file_jobs = file
            .scrape_configs
            .iter()
            .filter(|p| !relation_names.contains(p.job_name.as_str()));

        let jobs: Vec<ScrapeJob> = file_jobs
            .chain(relation_probes.iter())
            .map(|probe| self.probe_job(probe))
            .collect();

        debug!(
            file = file.scrape_configs.len(),
            relation = relation_probes.len(),
            jobs = jobs.len(),
            "Built probes scraping jobs"
        );
        Ok(jobs)
    }

    fn probe_job(&self, probe: &Probe) -> ScrapeJob {
        let mut extra = probe.extra.clone();
        extra.remove("metrics_path");
        extra.remove("relabel_configs");

        ScrapeJob {
            job_name: Some(probe.job_name.clone()),
            metrics_path: self.probe_path(),
            params: probe.params.clone(),
            static_configs: probe.static_configs.clone(),
            relabel_configs: self.relabel_configs(),
            extra,
        }
    }

    fn relabel_configs(&self) -> Vec<RelabelConfig> {
        vec![
            RelabelConfig::copy("__address__", "__param_target"),
            RelabelConfig::copy("__param_target", "instance"),
            RelabelConfig::copy("__param_target", "probe_target"),
            RelabelConfig::replace("__address__", self.address.clone()),
        ]
    }
}

fn parse_probes_file(text: &str) -> Result<ProbesFile> {
    if text.trim().is_empty() {
        return Ok(ProbesFile::default());
    }
    serde_yaml::from_str(text).map_err(|e| ProbesError::ConfigParse(e.to_string()))
}
