use crate::csi::proto::{
    controller_server::ControllerServer, identity_server::IdentityServer, node_server::NodeServer,
};
use crate::csi::{ControllerService, IdentityService, NodeService};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tonic::transport::Server;
use tower_http::trace::TraceLayer;

/// CSI gRPC server
///
/// Serves Identity, Controller and Node on one Unix socket; the plugin runs
/// as a single process per node.
pub struct CsiServer {
    identity: IdentityService,
    controller: ControllerService,
    node: NodeService,
}

impl CsiServer {
    pub fn new(
        identity: IdentityService,
        controller: ControllerService,
        node: NodeService,
    ) -> Self {
        Self { identity, controller, node }
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve(
        self,
        socket_path: impl AsRef<Path>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let socket_path = socket_path.as_ref();
        let uds = bind_socket(socket_path)?;
        let uds_stream = tokio_stream::wrappers::UnixListenerStream::new(uds);

        tracing::info!(socket = %socket_path.display(), "CSI server listening");

        Server::builder()
            .layer(TraceLayer::new_for_grpc())
            .add_service(IdentityServer::new(self.identity))
            .add_service(ControllerServer::new(self.controller))
            .add_service(NodeServer::new(self.node))
            .serve_with_incoming_shutdown(uds_stream, shutdown)
            .await
            .context("gRPC server error")?;

        tracing::info!("CSI server stopped");
        Ok(())
    }
}

/// Remove a stale socket, create the parent directory and bind.
pub fn bind_socket(path: &Path) -> Result<tokio::net::UnixListener> {
    if path.exists() {
        std::fs::remove_file(path).context("Failed to remove existing socket")?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    tokio::net::UnixListener::bind(path)
        .with_context(|| format!("Failed to bind Unix socket {}", path.display()))
}

/// Socket path for a `unix://` endpoint.
pub fn socket_path(endpoint: &str) -> Result<PathBuf> {
    crate::config::parse_endpoint(endpoint).map(PathBuf::from)
}
