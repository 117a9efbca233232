use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lvm_csi::config::Config;
use lvm_csi::csi::{ControllerService, CsiMetrics, CsiServer, IdentityService, NodeService};
use lvm_csi::iolimit::IoLimiter;
use lvm_csi::lvm::{LvmCommand, VolumeManager, VolumeRegistry};

#[derive(Parser, Debug)]
#[command(name = "lvm-csi", version, about = "CSI plugin for node-local LVM volumes")]
struct Cli {
    #[arg(long, env = "CSI_ENDPOINT", help = "CSI endpoint, e.g. unix:///csi/csi.sock")]
    endpoint: Option<String>,

    #[arg(long, help = "Name of the driver")]
    drivername: Option<String>,

    #[arg(long, env = "NODE_ID", help = "Node id")]
    nodeid: Option<String>,

    #[arg(long, action = ArgAction::Set, value_name = "BOOL", help = "Enable LVM volumes")]
    enablelvm: Option<bool>,

    #[arg(long, value_name = "FILE", help = "Configuration file")]
    config: Option<String>,

    #[arg(long, help = "Log as JSON")]
    log_json: bool,
}

impl Cli {
    /// Flags win over file and environment.
    fn apply(&self, config: &mut Config) {
        if let Some(endpoint) = &self.endpoint {
            config.driver.endpoint = endpoint.clone();
        }
        if let Some(name) = &self.drivername {
            config.driver.name = name.clone();
        }
        if let Some(node_id) = &self.nodeid {
            config.driver.node_id = node_id.clone();
        }
        if let Some(enabled) = self.enablelvm {
            config.lvm.enabled = enabled;
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lvm_csi=debug,info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        driver = %config.driver.name,
        version = %config.driver.vendor_version,
        node_id = %config.driver.node_id,
        lvm_enabled = config.lvm.enabled,
        "Starting lvm-csi"
    );

    let backend = Arc::new(LvmCommand::with_binaries(
        config.lvm.lvcreate_bin.clone(),
        config.lvm.lvremove_bin.clone(),
    ));
    let manager =
        VolumeManager::new(&config.lvm.volume_dir, backend, Arc::new(VolumeRegistry::new()));
    if config.lvm.enabled {
        manager.ensure_volume_dir().await.context("Failed to prepare volume directory")?;
    }

    let registry = Arc::new(prometheus::Registry::new());
    let metrics = Arc::new(CsiMetrics::new(registry).context("Failed to register metrics")?);

    let identity = IdentityService::new(
        config.driver.name.clone(),
        config.driver.vendor_version.clone(),
        config.lvm.volume_dir.clone(),
    );
    let controller = ControllerService::new(
        Arc::new(manager),
        metrics.clone(),
        config.driver.name.clone(),
        config.lvm.enabled,
    );
    let node = NodeService::new(
        IoLimiter::new(&config.cgroup.root),
        metrics,
        config.driver.node_id.clone(),
        config.lvm.volume_dir.clone(),
        config.cgroup.container_runtime.clone(),
    );

    let socket_path = config.socket_path()?;
    CsiServer::new(identity, controller, node).serve(socket_path, shutdown_signal()).await
}
