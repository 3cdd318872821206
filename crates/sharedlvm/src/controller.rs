use crate::error::Error;
use lvm_utils::{CreateOutcome, Lvm, VolumeRef};
use sharedlvm_proto::csi;
use std::{convert::TryFrom, sync::Arc};
use tonic::{Request, Response, Status};
use tracing::{debug, info};

const VOLUME_GROUP_PARAMETER: &str = "volumeGroup";

/// CSI controller service: provisions logical volumes and validates
/// capability requests. Runs once per cluster.
pub struct Controller {
  lvm: Arc<dyn Lvm>,
}

impl Controller {
  pub fn new(lvm: Arc<dyn Lvm>) -> Self {
    Controller { lvm }
  }
}

fn controller_capabilities() -> Vec<csi::ControllerServiceCapability> {
  use csi::controller_service_capability::{rpc, Rpc, Type};

  [rpc::Type::CreateDeleteVolume]
    .iter()
    .map(|&cap| csi::ControllerServiceCapability {
      r#type: Some(Type::Rpc(Rpc { r#type: cap as i32 })),
    })
    .collect()
}

// A capability is confirmed when its access type is mount and its access
// mode is one of the single-node writer modes. Raw-block requests and
// multi-node modes are dropped from the confirmed set, not errors.
fn is_supported_capability(cap: &csi::VolumeCapability) -> bool {
  use csi::volume_capability::{access_mode::Mode, AccessType};

  let supported_access_type = matches!(cap.access_type, Some(AccessType::Mount(_)));

  let mode = cap.access_mode.as_ref().map(|m| m.mode).unwrap_or_default();
  let supported_access_mode =
    mode == Mode::SingleNodeWriter as i32 || mode == Mode::SingleNodeSingleWriter as i32;

  supported_access_type && supported_access_mode
}

#[tonic::async_trait]
impl csi::controller_server::Controller for Controller {
  async fn create_volume(
    &self,
    request: Request<csi::CreateVolumeRequest>,
  ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
    let req = request.into_inner();
    info!(
      "CreateVolume: name={:?} parameters={:?}",
      req.name, req.parameters
    );

    let group = req
      .parameters
      .get(VOLUME_GROUP_PARAMETER)
      .ok_or_else(|| Status::invalid_argument("volumeGroup parameter is required"))?;

    let volume = VolumeRef::new(&req.name, group).map_err(Error::from)?;

    let capacity_bytes = req
      .capacity_range
      .as_ref()
      .map(|range| range.required_bytes)
      .unwrap_or_default();
    let size_bytes = u64::try_from(capacity_bytes)
      .map_err(|_| Status::invalid_argument("required capacity must not be negative"))?;

    self
      .lvm
      .start_vg_lock(volume.group())
      .map_err(Error::Lock)?;

    match self.lvm.create_volume(&volume, size_bytes).map_err(Error::from)? {
      CreateOutcome::Created => info!("created volume {}", volume),
      CreateOutcome::AlreadyExists => debug!("volume {} already exists", volume),
    }

    // Activation is deferred to the node that will actually mount the
    // volume; no device node may linger on a host that never becomes
    // responsible for it.
    self.lvm.deactivate_volume(&volume).map_err(Error::from)?;

    Ok(Response::new(csi::CreateVolumeResponse {
      volume: Some(csi::Volume {
        capacity_bytes,
        volume_id: volume.to_string(),
        volume_context: req.parameters,
        content_source: None,
        accessible_topology: Vec::new(),
      }),
    }))
  }

  /// Deliberately leaves the logical volume in place: nothing in this
  /// version of the plugin destroys data. The orchestrator soft-retires
  /// the volume record on its side.
  async fn delete_volume(
    &self,
    request: Request<csi::DeleteVolumeRequest>,
  ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
    let req = request.into_inner();
    info!("DeleteVolume (retained): {:?}", req.volume_id);

    Ok(Response::new(csi::DeleteVolumeResponse {}))
  }

  async fn validate_volume_capabilities(
    &self,
    request: Request<csi::ValidateVolumeCapabilitiesRequest>,
  ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
    let req = request.into_inner();
    info!("ValidateVolumeCapabilities: {:?}", req.volume_id);

    if req.volume_id.is_empty() {
      return Err(Status::invalid_argument("Volume ID not provided"));
    }
    if req.volume_capabilities.is_empty() {
      return Err(Status::invalid_argument("Volume capabilities not provided"));
    }

    let confirmed = req
      .volume_capabilities
      .into_iter()
      .filter(is_supported_capability)
      .collect();

    Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
      confirmed: Some(csi::validate_volume_capabilities_response::Confirmed {
        volume_context: Default::default(),
        volume_capabilities: confirmed,
        parameters: Default::default(),
      }),
      message: String::new(),
    }))
  }

  async fn controller_get_capabilities(
    &self,
    _request: Request<csi::ControllerGetCapabilitiesRequest>,
  ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
    Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
      capabilities: controller_capabilities(),
    }))
  }

  async fn controller_publish_volume(
    &self,
    _request: Request<csi::ControllerPublishVolumeRequest>,
  ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
    unsupported!("ControllerPublishVolume")
  }

  async fn controller_unpublish_volume(
    &self,
    _request: Request<csi::ControllerUnpublishVolumeRequest>,
  ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
    unsupported!("ControllerUnpublishVolume")
  }

  async fn list_volumes(
    &self,
    _request: Request<csi::ListVolumesRequest>,
  ) -> Result<Response<csi::ListVolumesResponse>, Status> {
    unsupported!("ListVolumes")
  }

  async fn get_capacity(
    &self,
    _request: Request<csi::GetCapacityRequest>,
  ) -> Result<Response<csi::GetCapacityResponse>, Status> {
    unsupported!("GetCapacity")
  }

  async fn create_snapshot(
    &self,
    _request: Request<csi::CreateSnapshotRequest>,
  ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
    unsupported!("CreateSnapshot")
  }

  async fn delete_snapshot(
    &self,
    _request: Request<csi::DeleteSnapshotRequest>,
  ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
    unsupported!("DeleteSnapshot")
  }

  async fn list_snapshots(
    &self,
    _request: Request<csi::ListSnapshotsRequest>,
  ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
    unsupported!("ListSnapshots")
  }

  async fn controller_expand_volume(
    &self,
    _request: Request<csi::ControllerExpandVolumeRequest>,
  ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
    unsupported!("ControllerExpandVolume")
  }

  async fn controller_get_volume(
    &self,
    _request: Request<csi::ControllerGetVolumeRequest>,
  ) -> Result<Response<csi::ControllerGetVolumeResponse>, Status> {
    unsupported!("ControllerGetVolume")
  }
}
