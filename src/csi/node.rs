use crate::csi::CsiMetrics;
use crate::csi::controller::CONTEXT_VOLUME_PATH;
use crate::csi::proto::{
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest,
    NodeGetInfoResponse, NodePublishVolumeRequest, NodePublishVolumeResponse,
    NodeStageVolumeRequest, NodeStageVolumeResponse, NodeUnpublishVolumeRequest,
    NodeUnpublishVolumeResponse, NodeUnstageVolumeRequest, NodeUnstageVolumeResponse,
    node_server::Node,
};
use crate::helper;
use crate::iolimit::{IoLimitRequest, IoLimiter, IoMax};
use crate::lvm::LogicalVolume;
use crate::lvm::volume::PARAM_VG_NAME;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

/// Set by the kubelet when the CSIDriver object has `podInfoOnMount: true`.
pub const CONTEXT_POD_UID: &str = "csi.storage.k8s.io/pod.uid";

/// Node Service implementation
///
/// Volumes are consumed as raw block devices, so publishing only applies
/// per-pod I/O limits.
#[derive(Clone)]
pub struct NodeService {
    limiter: IoLimiter,
    metrics: Arc<CsiMetrics>,
    node_id: String,
    volume_dir: PathBuf,
    container_runtime: String,
}

impl NodeService {
    pub fn new(
        limiter: IoLimiter,
        metrics: Arc<CsiMetrics>,
        node_id: impl Into<String>,
        volume_dir: impl Into<PathBuf>,
        container_runtime: impl Into<String>,
    ) -> Self {
        Self {
            limiter,
            metrics,
            node_id: node_id.into(),
            volume_dir: volume_dir.into(),
            container_runtime: container_runtime.into(),
        }
    }

    pub fn cgroup_root(&self) -> &Path {
        self.limiter.cgroup_root()
    }

    /// `volume-path` from the context, else `<volume_dir>/<vgname>/<volume_id>`.
    fn device_path(&self, volume_id: &str, context: &HashMap<String, String>) -> Option<PathBuf> {
        if let Some(path) = context.get(CONTEXT_VOLUME_PATH) {
            return Some(PathBuf::from(path));
        }
        helper::get_insensitive_parameter(context, PARAM_VG_NAME)
            .map(|vg| LogicalVolume::device_path(&self.volume_dir, vg, volume_id))
    }

    async fn do_publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), Status> {
        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID missing in request"));
        }
        if req.target_path.is_empty() {
            return Err(Status::invalid_argument("Target path missing in request"));
        }

        let limits = IoMax::from_context(&req.volume_context)?;
        if limits.is_unlimited() {
            return Ok(());
        }

        let pod_uid = req.volume_context.get(CONTEXT_POD_UID).cloned().ok_or_else(|| {
            Status::invalid_argument(format!("{} missing in volume context", CONTEXT_POD_UID))
        })?;
        let device_name = self.device_path(&req.volume_id, &req.volume_context).ok_or_else(|| {
            Status::invalid_argument(format!("cannot locate device of {}", req.volume_id))
        })?;

        let request = IoLimitRequest {
            device_name,
            pod_uid,
            container_runtime: self.container_runtime.clone(),
            limits,
        };

        let limiter = self.limiter.clone();
        tokio::task::spawn_blocking(move || limiter.set_io_limits(&request))
            .await
            .map_err(|e| Status::internal(format!("io limit task failed: {}", e)))??;

        Ok(())
    }
}

#[tonic::async_trait]
impl Node for NodeService {
    async fn node_stage_volume(
        &self,
        _request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        Ok(Response::new(NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        _request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        Ok(Response::new(NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let started = Instant::now();
        let result = self.do_publish_volume(request.into_inner()).await;
        self.metrics.observe("NodePublishVolume", started, result)?;

        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        _request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        // Limits live in the pod cgroup and go away with it.
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        Ok(Response::new(NodeGetCapabilitiesResponse { capabilities: vec![] }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_UID: &str = "5f4b1c3e-2a9d-4a7e-8f0b-1c2d3e4f5a6b";

    fn service(cgroup_root: &Path, runtime: &str) -> NodeService {
        let metrics = Arc::new(CsiMetrics::unregistered().unwrap());
        NodeService::new(IoLimiter::new(cgroup_root), metrics, "node-1", "/dev", runtime)
    }

    fn publish_request(context: &[(&str, &str)]) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: "test".to_string(),
            publish_context: HashMap::new(),
            staging_target_path: String::new(),
            target_path: "/var/lib/kubelet/pods/x/volumes/test".to_string(),
            volume_capability: None,
            readonly: false,
            secrets: HashMap::new(),
            volume_context: context
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_node_get_info() {
        let service = service(Path::new("/sys/fs/cgroup"), "containerd");
        let info = service.node_get_info(Request::new(NodeGetInfoRequest {})).await.unwrap();
        assert_eq!(info.into_inner().node_id, "node-1");
    }

    #[tokio::test]
    async fn test_node_get_capabilities_empty() {
        let service = service(Path::new("/sys/fs/cgroup"), "containerd");
        let caps = service
            .node_get_capabilities(Request::new(NodeGetCapabilitiesRequest {}))
            .await
            .unwrap();
        assert!(caps.into_inner().capabilities.is_empty());
    }

    #[tokio::test]
    async fn test_publish_without_limits_is_noop() {
        // The cgroup root does not exist; it must not be consulted.
        let service = service(Path::new("/nonexistent/cgroup"), "containerd");
        service.node_publish_volume(Request::new(publish_request(&[]))).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_requires_pod_uid() {
        let service = service(Path::new("/nonexistent/cgroup"), "containerd");
        let req = publish_request(&[("riops", "100"), (CONTEXT_VOLUME_PATH, "/dev/null")]);
        let err = service.node_publish_volume(Request::new(req)).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_publish_applies_limits() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("cgroup.controllers"), "io memory").unwrap();
        let pod = root
            .path()
            .join("kubepods.slice/kubepods-pod5f4b1c3e_2a9d_4a7e_8f0b_1c2d3e4f5a6b.slice");
        std::fs::create_dir_all(&pod).unwrap();
        std::fs::write(pod.join("io.max"), "").unwrap();

        let service = service(root.path(), "containerd");
        let req = publish_request(&[
            ("riops", "100"),
            ("wbps", "1048576"),
            (CONTEXT_POD_UID, POD_UID),
            (CONTEXT_VOLUME_PATH, "/dev/null"),
        ]);
        service.node_publish_volume(Request::new(req)).await.unwrap();

        let written = std::fs::read_to_string(pod.join("io.max")).unwrap();
        assert_eq!(written, "1:3 riops=100 wbps=1048576");
    }

    #[tokio::test]
    async fn test_publish_unsupported_runtime() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("cgroup.controllers"), "io").unwrap();

        let service = service(root.path(), "docker");
        let req = publish_request(&[
            ("wiops", "10"),
            (CONTEXT_POD_UID, POD_UID),
            (CONTEXT_VOLUME_PATH, "/dev/null"),
        ]);
        let err = service.node_publish_volume(Request::new(req)).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_device_path_fallback() {
        let service = service(Path::new("/sys/fs/cgroup"), "containerd");
        let ctx = HashMap::from([("VGName".to_string(), "lvmvg".to_string())]);
        assert_eq!(service.device_path("test", &ctx), Some(PathBuf::from("/dev/lvmvg/test")));
        assert_eq!(service.device_path("test", &HashMap::new()), None);
        assert_eq!(service.cgroup_root(), Path::new("/sys/fs/cgroup"));
    }
}
