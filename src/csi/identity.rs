use crate::csi::proto::{
    GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, PluginCapability, ProbeRequest, ProbeResponse,
    identity_server::Identity,
};
use crate::helper;
use std::path::PathBuf;
use tonic::{Request, Response, Status};

/// Identity Service implementation
///
/// Reports the driver name Kubernetes matches against the StorageClass
/// provisioner, and readiness of the node's volume root.
#[derive(Debug, Clone)]
pub struct IdentityService {
    name: String,
    version: String,
    volume_dir: PathBuf,
}

impl IdentityService {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        volume_dir: impl Into<PathBuf>,
    ) -> Self {
        Self { name: name.into(), version: version.into(), volume_dir: volume_dir.into() }
    }
}

#[tonic::async_trait]
impl Identity for IdentityService {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        if self.name.is_empty() {
            return Err(Status::unavailable("driver name not configured"));
        }

        Ok(Response::new(GetPluginInfoResponse {
            name: self.name.clone(),
            vendor_version: self.version.clone(),
            manifest: Default::default(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        use crate::csi::proto::plugin_capability::{Service, service::Type};

        let capabilities = vec![PluginCapability {
            r#type: Some(crate::csi::proto::plugin_capability::Type::Service(Service {
                r#type: Type::ControllerService as i32,
            })),
        }];

        Ok(Response::new(GetPluginCapabilitiesResponse { capabilities }))
    }

    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        let ready = helper::dir_exists(&self.volume_dir);
        if !ready {
            tracing::warn!(volume_dir = %self.volume_dir.display(), "volume directory missing");
        }
        Ok(Response::new(ProbeResponse { ready: Some(ready) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRIVER: &str = "csidriver.whou.io";

    fn service(volume_dir: impl Into<PathBuf>) -> IdentityService {
        IdentityService::new(DRIVER, "0.1.0", volume_dir)
    }

    #[tokio::test]
    async fn test_get_plugin_info() {
        let service = service("/dev");
        let request = Request::new(GetPluginInfoRequest {});

        let response = service.get_plugin_info(request).await.unwrap();
        let info = response.into_inner();

        assert_eq!(info.name, DRIVER);
        assert_eq!(info.vendor_version, "0.1.0");
    }

    #[tokio::test]
    async fn test_get_plugin_info_without_name() {
        let service = IdentityService::new("", "0.1.0", "/dev");
        let err = service.get_plugin_info(Request::new(GetPluginInfoRequest {})).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_get_plugin_capabilities() {
        let service = service("/dev");
        let request = Request::new(GetPluginCapabilitiesRequest {});

        let response = service.get_plugin_capabilities(request).await.unwrap();
        let caps = response.into_inner();

        assert_eq!(caps.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_probe() {
        let dir = tempfile::tempdir().unwrap();
        let response = service(dir.path()).probe(Request::new(ProbeRequest {})).await.unwrap();
        assert_eq!(response.into_inner().ready, Some(true));

        let missing = dir.path().join("missing");
        let response = service(missing).probe(Request::new(ProbeRequest {})).await.unwrap();
        assert_eq!(response.into_inner().ready, Some(false));
    }
}
