use crate::csi::CsiMetrics;
use crate::csi::proto::{
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse,
    ControllerUnpublishVolumeRequest, ControllerUnpublishVolumeResponse, CreateVolumeRequest,
    CreateVolumeResponse, DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest,
    GetCapacityResponse, ListVolumesRequest, ListVolumesResponse, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, Volume, VolumeCapability, controller_server::Controller,
    volume_capability::access_mode::Mode,
};
use crate::lvm::volume::PARAM_VG_NAME;
use crate::lvm::{LogicalVolume, LvmError, VolumeManager};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

pub const CONTEXT_DRIVER_NAME: &str = "driver-name";
pub const CONTEXT_VOLUME_NAME: &str = "volume-name";
pub const CONTEXT_VOLUME_PATH: &str = "volume-path";

/// Controller Service implementation
///
/// Handles volume lifecycle: create, delete, list
#[derive(Clone)]
pub struct ControllerService {
    manager: Arc<VolumeManager>,
    metrics: Arc<CsiMetrics>,
    driver_name: String,
    enabled: bool,
}

impl ControllerService {
    pub fn new(
        manager: Arc<VolumeManager>,
        metrics: Arc<CsiMetrics>,
        driver_name: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self { manager, metrics, driver_name: driver_name.into(), enabled }
    }

    fn ensure_enabled(&self) -> Result<(), Status> {
        if !self.enabled {
            return Err(Status::failed_precondition("LVM support is disabled on this node"));
        }
        Ok(())
    }

    /// Storage class parameters plus what the node side needs to find the
    /// device again.
    fn volume_context(
        &self,
        lv: &LogicalVolume,
        parameters: HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut context = parameters;
        context.insert(CONTEXT_DRIVER_NAME.to_string(), self.driver_name.clone());
        context.insert(CONTEXT_VOLUME_NAME.to_string(), lv.name.clone());
        context.insert(CONTEXT_VOLUME_PATH.to_string(), lv.path.display().to_string());
        context.insert(PARAM_VG_NAME.to_string(), lv.vg_name.clone());
        context
    }

    async fn do_create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, Status> {
        self.ensure_enabled()?;

        if req.name.is_empty() {
            return Err(Status::invalid_argument("Name missing in request"));
        }
        validate_capabilities(&req.volume_capabilities)?;

        let capacity_bytes = req.capacity_range.as_ref().map(|r| r.required_bytes).unwrap_or(0);
        let lv = LogicalVolume::for_create(
            self.manager.volume_dir(),
            &req.name,
            &req.parameters,
            capacity_bytes,
        )?;

        let lv = self.manager.create_logical_volume(lv).await?;
        self.metrics.add_volume(&lv.name, lv.capacity_bytes);

        Ok(Volume {
            volume_id: lv.name.clone(),
            capacity_bytes: lv.capacity_bytes,
            volume_context: self.volume_context(&lv, req.parameters),
            accessible_topology: vec![],
        })
    }

    async fn do_delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), Status> {
        self.ensure_enabled()?;

        if req.volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume ID missing in request"));
        }

        match self.manager.delete_volume(&req.volume_id).await {
            Ok(()) => {
                self.metrics.remove_volume(&req.volume_id);
                Ok(())
            }
            Err(LvmError::NotFound(what)) => {
                tracing::info!(volume_id = %req.volume_id, %what, "volume already gone");
                Ok(())
            }
            // The manager dropped the stale record; only the metrics still know it.
            Err(LvmError::DeviceMissing(path)) => {
                tracing::warn!(volume_id = %req.volume_id, %path, "device was already removed");
                self.metrics.remove_volume(&req.volume_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// At least one capability, and only single node writer access.
fn validate_capabilities(capabilities: &[VolumeCapability]) -> Result<(), Status> {
    if capabilities.is_empty() {
        return Err(Status::invalid_argument("Volume capabilities missing in request"));
    }
    for cap in capabilities {
        let mode = cap.access_mode.as_ref().map(|m| m.mode()).unwrap_or(Mode::Unknown);
        if mode != Mode::SingleNodeWriter {
            return Err(Status::invalid_argument(format!(
                "Unsupported access mode {}",
                mode.as_str_name()
            )));
        }
    }
    Ok(())
}

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let started = Instant::now();
        let result = self.do_create_volume(request.into_inner()).await;
        let volume = self.metrics.observe("CreateVolume", started, result)?;

        Ok(Response::new(CreateVolumeResponse { volume: Some(volume) }))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        let started = Instant::now();
        let result = self.do_delete_volume(request.into_inner()).await;
        self.metrics.observe("DeleteVolume", started, result)?;

        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerPublishVolume is not supported"))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerUnpublishVolume is not supported"))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();

        let result: Result<ValidateVolumeCapabilitiesResponse, Status> = async {
            if req.volume_id.is_empty() {
                return Err(Status::invalid_argument("Volume ID missing in request"));
            }
            if req.volume_capabilities.is_empty() {
                return Err(Status::invalid_argument("Volume capabilities missing in request"));
            }
            self.manager.get_volume(&req.volume_id).await?;

            // Unsupported capabilities are reported by leaving `confirmed` unset.
            if let Err(status) = validate_capabilities(&req.volume_capabilities) {
                return Ok(ValidateVolumeCapabilitiesResponse {
                    confirmed: None,
                    message: status.message().to_string(),
                });
            }

            Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: Some(
                    crate::csi::proto::validate_volume_capabilities_response::Confirmed {
                        volume_context: req.volume_context,
                        volume_capabilities: req.volume_capabilities,
                        parameters: req.parameters,
                    },
                ),
                message: String::new(),
            })
        }
        .await;

        let response = self.metrics.observe("ValidateVolumeCapabilities", started, result)?;
        Ok(Response::new(response))
    }

    async fn list_volumes(
        &self,
        request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();

        let result = if req.starting_token.is_empty() {
            Ok(self.manager.list_volumes().await)
        } else {
            Err(Status::aborted(format!("Invalid starting token {}", req.starting_token)))
        };
        let mut volumes = self.metrics.observe("ListVolumes", started, result)?;
        if req.max_entries > 0 {
            volumes.truncate(req.max_entries as usize);
        }

        let entries: Vec<_> = volumes
            .into_iter()
            .map(|lv| crate::csi::proto::list_volumes_response::Entry {
                volume: Some(Volume {
                    volume_id: lv.name.clone(),
                    capacity_bytes: lv.capacity_bytes,
                    volume_context: self.volume_context(&lv, HashMap::new()),
                    accessible_topology: vec![],
                }),
            })
            .collect();

        Ok(Response::new(ListVolumesResponse { entries, next_token: String::new() }))
    }

    async fn get_capacity(
        &self,
        _request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        Err(Status::unimplemented("GetCapacity is not supported"))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        use crate::csi::proto::ControllerServiceCapability;
        use crate::csi::proto::controller_service_capability::{Rpc, rpc::Type};

        let capabilities = [Type::CreateDeleteVolume, Type::ListVolumes]
            .into_iter()
            .map(|t| ControllerServiceCapability {
                r#type: Some(crate::csi::proto::controller_service_capability::Type::Rpc(Rpc {
                    r#type: t as i32,
                })),
            })
            .collect();

        Ok(Response::new(ControllerGetCapabilitiesResponse { capabilities }))
    }
}
