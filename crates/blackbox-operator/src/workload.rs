//! Blackbox Exporter workload management
//!
//! The exporter runs in its own container under a process manager. The
//! operator sees that container through its filesystem root: it renders the
//! exporter configuration and the service layer there, hot-reloads the
//! exporter over HTTP and falls back to restarting the service.

use crate::config::{CONFIG_PATH, CONTAINER_NAME, EXPORTER_PORT};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Exporter executable inside the workload container
pub const EXPORTER_BINARY: &str = "blackbox_exporter";

/// Directory, relative to the container root, holding service layers
pub const LAYERS_DIR: &str = "var/lib/pebble/default/layers";

/// Message raised when the configured exporter config is not YAML
pub const INVALID_YAML: &str = "Failed to load config; invalid YAML";

/// Message raised when neither reload nor restart succeeded
pub const RELOAD_FAILED: &str = "Is config valid? hot reload and service restart failed.";

const API_TIMEOUT: Duration = Duration::from_secs(2);
const API_ATTEMPTS: u32 = 3;
const API_RETRY_DELAY: Duration = Duration::from_millis(200);

static VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version (\d*\.\d*\.\d*)").expect("version regex is valid"));

/// Operations the controller needs from the workload container
#[async_trait]
pub trait Workload: Send + Sync {
    /// Whether the container can be interacted with
    async fn is_ready(&self) -> bool;

    /// Exporter configuration before relation modules are merged in
    async fn build_config(&self) -> Result<Value>;

    /// Write `config` unless the file on disk already holds it. Returns
    /// whether anything was written.
    async fn push_config(&self, config: &Value) -> Result<bool>;

    /// Render the service layer
    async fn update_layer(&self) -> Result<()>;

    /// Hot-reload the exporter, restarting it if that fails
    async fn reload(&self) -> Result<()>;

    /// Current configuration file content
    async fn read_config(&self) -> Result<String>;

    /// Exporter version, if it can be determined
    async fn version(&self) -> Option<String>;
}

/// Module set used when no configuration file is provided
pub fn default_config() -> Value {
    json!({
        "modules": {
            "http_2xx": {"prober": "http", "http": {"preferred_ip_protocol": "ip4"}},
            "http_post_2xx": {"prober": "http", "http": {"method": "POST"}},
            "tcp_connect": {"prober": "tcp"},
            "pop3s_banner": {
                "prober": "tcp",
                "tcp": {
                    "query_response": [{"expect": "^+OK"}],
                    "tls": true,
                    "tls_config": {"insecure_skip_verify": false}
                }
            },
            "grpc": {"prober": "grpc", "grpc": {"tls": true, "preferred_ip_protocol": "ip4"}},
            "grpc_plain": {"prober": "grpc", "grpc": {"tls": false, "service": "service1"}},
            "ssh_banner": {
                "prober": "tcp",
                "tcp": {
                    "query_response": [
                        {"expect": "^SSH-2.0-"},
                        {"send": "SSH-2.0-blackbox-ssh-check"}
                    ]
                }
            },
            "irc_banner": {
                "prober": "tcp",
                "tcp": {
                    "query_response": [
                        {"send": "NICK prober"},
                        {"send": "USER prober prober prober :prober"},
                        {"expect": "PING :([^ ]+)", "send": "PONG ${1}"},
                        {"expect": "^:[^ ]+ 001"}
                    ]
                }
            },
            "icmp": {"prober": "icmp"},
            "icmp_ttl5": {"prober": "icmp", "timeout": "5s", "icmp": {"ttl": 5}}
        }
    })
}

/// Extract `X.Y.Z` from `blackbox_exporter --version` output
pub fn parse_version(output: &str) -> Option<String> {
    VERSION_REGEX
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Service layer for the process manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub summary: String,
    pub description: String,
    pub services: BTreeMap<String, LayerService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerService {
    #[serde(rename = "override")]
    pub override_: String,
    pub summary: String,
    pub command: String,
    pub startup: String,
}

impl Layer {
    /// Layer running the exporter with `config_path` and `external_url`
    pub fn exporter(config_path: &str, port: u16, external_url: &str) -> Self {
        let command = format!(
            "/bin/sh -c '{} --config.file={} --web.listen-address=:{} --web.external-url={} 2>&1'",
            EXPORTER_BINARY, config_path, port, external_url
        );
        let service = LayerService {
            override_: "replace".to_string(),
            summary: "blackbox exporter service".to_string(),
            command,
            startup: "enabled".to_string(),
        };
        Self {
            summary: "blackbox exporter layer".to_string(),
            description: "pebble config layer for blackbox exporter".to_string(),
            services: BTreeMap::from([(CONTAINER_NAME.to_string(), service)]),
        }
    }
}

/// Client for the exporter's HTTP API
#[derive(Debug, Clone)]
pub struct ExporterApi {
    base_url: String,
    client: reqwest::Client,
}

impl ExporterApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the exporter to reload its configuration
    pub async fn reload(&self) -> Result<()> {
        let url = format!("{}/-/reload", self.base_url);
        let mut attempt = 1;
        loop {
            let response = self
                .client
                .post(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match response {
                Ok(response) => {
                    let body = response.text().await.unwrap_or_default();
                    if !body.is_empty() {
                        warn!(body = %body, "Reload returned a non-empty response");
                    }
                    return Ok(());
                }
                Err(e) if attempt >= API_ATTEMPTS => return Err(e.into()),
                Err(e) => {
                    debug!(attempt, error = %e, "Reload request failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(API_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Workload container seen through its filesystem root
pub struct ExporterWorkload {
    root: PathBuf,
    config_file: String,
    web_external_url: String,
    api: ExporterApi,
    restart_command: Option<String>,
    binary: String,
}

impl ExporterWorkload {
    /// `config_file` is the configured exporter configuration, empty for
    /// the built-in modules.
    pub fn new(
        root: impl Into<PathBuf>,
        config_file: impl Into<String>,
        external_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            config_file: config_file.into(),
            web_external_url: String::new(),
            api: ExporterApi::new(external_url)?,
            restart_command: None,
            binary: EXPORTER_BINARY.to_string(),
        })
    }

    /// URL the exporter advertises for itself
    pub fn with_web_external_url(mut self, url: impl Into<String>) -> Self {
        self.web_external_url = url.into();
        self
    }

    /// Shell command restarting the exporter service
    pub fn with_restart_command(mut self, command: impl Into<String>) -> Self {
        self.restart_command = Some(command.into());
        self
    }

    /// Executable queried for the version
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Host path of a container path
    pub fn container_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub fn layer_path(&self) -> PathBuf {
        self.root
            .join(LAYERS_DIR)
            .join(format!("001-{}.yaml", CONTAINER_NAME))
    }

    async fn ensure_ready(&self, action: &str) -> Result<()> {
        if self.is_ready().await {
            Ok(())
        } else {
            Err(OperatorError::ContainerNotReady(format!("cannot {}", action)))
        }
    }

    async fn current_config(&self) -> Result<Option<Value>> {
        match tokio::fs::read_to_string(self.container_path(CONFIG_PATH)).await {
            Ok(content) => Ok(serde_yaml::from_str(&content).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Restart the exporter service. Returns false when the service does
    /// not exist yet or the restart failed.
    async fn restart_service(&self) -> bool {
        info!(service = CONTAINER_NAME, "Restarting service");

        let Some(command) = &self.restart_command else {
            error!("Cannot (re)start service: no restart command configured");
            return false;
        };
        if !service_defined(&self.layer_path()).await {
            error!("Cannot (re)start service: service does not (yet) exist");
            return false;
        }

        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
        {
            Ok(status) if status.success() => true,
            Ok(status) => {
                error!(%status, "Restart command failed");
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to run restart command");
                false
            }
        }
    }
}

async fn service_defined(layer_path: &Path) -> bool {
    let Ok(content) = tokio::fs::read_to_string(layer_path).await else {
        return false;
    };
    serde_yaml::from_str::<Layer>(&content)
        .map(|layer| layer.services.contains_key(CONTAINER_NAME))
        .unwrap_or(false)
}

async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[async_trait]
impl Workload for ExporterWorkload {
    async fn is_ready(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn build_config(&self) -> Result<Value> {
        self.ensure_ready("update config").await?;
        if self.config_file.trim().is_empty() {
            return Ok(default_config());
        }
        match serde_yaml::from_str::<Value>(&self.config_file) {
            Ok(config @ Value::Object(_)) => Ok(config),
            Ok(_) => {
                error!("Failed to load the configuration; expected a mapping");
                Err(OperatorError::ConfigUpdateFailure(INVALID_YAML.to_string()))
            }
            Err(e) => {
                error!(error = %e, "Failed to load the configuration; invalid YAML");
                Err(OperatorError::ConfigUpdateFailure(INVALID_YAML.to_string()))
            }
        }
    }

    async fn push_config(&self, config: &Value) -> Result<bool> {
        self.ensure_ready("update config").await?;
        if self.current_config().await?.as_ref() == Some(config) {
            return Ok(false);
        }
        let rendered = serde_yaml::to_string(config)?;
        write_file(&self.container_path(CONFIG_PATH), &rendered).await?;
        info!(path = CONFIG_PATH, "Pushed exporter configuration");
        Ok(true)
    }

    async fn update_layer(&self) -> Result<()> {
        self.ensure_ready("update layer").await?;
        let layer = Layer::exporter(CONFIG_PATH, EXPORTER_PORT, &self.web_external_url);
        write_file(&self.layer_path(), &serde_yaml::to_string(&layer)?).await
    }

    async fn reload(&self) -> Result<()> {
        self.ensure_ready("reload").await?;
        if let Err(e) = self.api.reload().await {
            warn!(error = %e, "Config reload via HTTP POST failed");
            if !self.restart_service().await {
                return Err(OperatorError::ConfigUpdateFailure(RELOAD_FAILED.to_string()));
            }
        }
        Ok(())
    }

    async fn read_config(&self) -> Result<String> {
        self.ensure_ready("read config").await?;
        Ok(tokio::fs::read_to_string(self.container_path(CONFIG_PATH)).await?)
    }

    async fn version(&self) -> Option<String> {
        if !self.is_ready().await {
            return None;
        }
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| debug!(error = %e, "Cannot query exporter version"))
            .ok()?;
        // Older releases print the version on stderr.
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        parse_version(&text)
    }
}
