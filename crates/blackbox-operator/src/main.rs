//! Blackbox Exporter Operator
//!
//! Entry point invoked by the host once per lifecycle event.

use anyhow::{Context, Result};
use blackbox_operator::config::{CharmConfig, CONTAINER_NAME};
use blackbox_operator::controller::{
    resolve_external_url, BlackboxController, ControllerContext, UnitStatus,
};
use blackbox_operator::event::HookEvent;
use blackbox_operator::resources::KubeResourcePatcher;
use blackbox_operator::state::DispatchState;
use blackbox_operator::workload::{default_config, ExporterWorkload};
use blackbox_probes::relation::InMemoryRelationStore;
use blackbox_probes::topology::Topology;
use clap::Parser;
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Blackbox Exporter Operator
#[derive(Parser, Debug)]
#[command(name = "blackbox-operator")]
#[command(about = "Operator for the Prometheus Blackbox Exporter")]
#[command(version)]
struct Args {
    /// Event being dispatched (e.g. hooks/config-changed)
    #[arg(long, env = "JUJU_DISPATCH_PATH", required_unless_present = "print_default_config")]
    dispatch_path: Option<String>,

    /// Relation the event concerns (endpoint:id)
    #[arg(long, env = "JUJU_RELATION_ID")]
    relation_id: Option<String>,

    #[arg(long, env = "JUJU_MODEL_NAME", default_value = "")]
    model: String,

    #[arg(long, env = "JUJU_MODEL_UUID", default_value = "")]
    model_uuid: String,

    /// Local unit (application/number)
    #[arg(long, env = "JUJU_UNIT_NAME", default_value = "blackbox/0")]
    unit: String,

    #[arg(long, env = "JUJU_CHARM_NAME", default_value = "blackbox-exporter-k8s")]
    charm_name: String,

    /// Application configuration options (YAML)
    #[arg(long, env = "BLACKBOX_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// State persisted between dispatches (JSON)
    #[arg(long, env = "BLACKBOX_STATE", default_value = "state.json")]
    state: PathBuf,

    /// Whether the local unit is the application leader
    #[arg(long, env = "IS_LEADER", default_value = "false")]
    leader: bool,

    /// Ingress URL overriding the ingress relation
    #[arg(long, env = "INGRESS_URL")]
    ingress_url: Option<String>,

    /// Fully qualified name of the unit's pod
    #[arg(long, env = "POD_FQDN", default_value = "localhost")]
    hostname: String,

    /// Workload container filesystem root
    #[arg(long, env = "WORKLOAD_ROOT", default_value = "/containers/blackbox")]
    workload_root: PathBuf,

    /// Command restarting the exporter service
    #[arg(long, env = "RESTART_COMMAND")]
    restart_command: Option<String>,

    /// Patch resource limits onto the application StatefulSet
    #[arg(long, env = "PATCH_RESOURCES", default_value = "false")]
    patch_resources: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Print the built-in exporter configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", serde_yaml::to_string(&default_config())?);
        return Ok(());
    }

    init_logging(&args)?;

    let dispatch_path = args.dispatch_path.as_deref().unwrap_or_default();
    let event = HookEvent::from_dispatch_path(dispatch_path, args.relation_id.as_deref())
        .context("Failed to parse dispatch path")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        event = %event,
        unit = %args.unit,
        "Dispatching event"
    );

    let mut state = DispatchState::load(&args.state).context("Failed to load state")?;

    let config = match CharmConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Rejecting application configuration");
            state.status = Some(UnitStatus::Blocked(e.to_string()));
            state.save(&args.state).context("Failed to save state")?;
            print_json(&state.status)?;
            return Ok(());
        }
    };

    let application = args
        .unit
        .split('/')
        .next()
        .unwrap_or(CONTAINER_NAME)
        .to_string();
    let topology = Topology::new(&args.model, &args.model_uuid, &application)
        .context("Invalid model topology")?
        .with_unit(&args.unit)
        .with_charm_name(&args.charm_name);

    let ctx = ControllerContext {
        config: config.clone(),
        topology,
        is_leader: args.leader,
        ingress_url: args.ingress_url.clone(),
        hostname: args.hostname.clone(),
    };

    let store = Arc::new(InMemoryRelationStore::from_snapshot(state.relations.clone()));
    let external_url = resolve_external_url(&ctx, store.as_ref());

    let mut workload = ExporterWorkload::new(&args.workload_root, config.config_file, &external_url)
        .context("Failed to create workload client")?;
    if let Some(command) = &args.restart_command {
        workload = workload.with_restart_command(command);
    }

    let mut controller = BlackboxController::new(ctx, store.clone(), Arc::new(workload))
        .with_previous(
            state.observed_probes.take(),
            state.status.take(),
            state.workload_version.take(),
        );

    if args.patch_resources {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        controller = controller.with_patcher(Arc::new(KubeResourcePatcher::new(
            client,
            &args.model,
            &application,
            CONTAINER_NAME,
        )));
    }

    if event == HookEvent::ShowConfig {
        let result = controller.show_config().await.context("show-config failed")?;
        print_json(&result)?;
        return Ok(());
    }

    controller.dispatch(&event).await;

    state.relations = store.snapshot();
    state.observed_probes = controller.observed_probes();
    state.status = controller.status().cloned();
    state.workload_version = controller.workload_version().map(str::to_string);
    state.save(&args.state).context("Failed to save state")?;

    print_json(&state.status)?;
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
