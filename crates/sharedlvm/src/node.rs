use crate::error::Error;
use lvm_utils::{Lvm, VolumeRef};
use mount_utils::Mounter;
use sharedlvm_proto::csi;
use std::{
  fs,
  path::{Path, PathBuf},
  sync::Arc,
};
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

/// CSI node service: owns the data path on one host. Activates a
/// provisioned volume, formats and mounts it at the workload's target
/// path, and tears both down again on unpublish.
pub struct Node {
  node_id: String,
  lvm: Arc<dyn Lvm>,
  mounter: Arc<dyn Mounter>,
}

impl Node {
  pub fn new(node_id: impl Into<String>, lvm: Arc<dyn Lvm>, mounter: Arc<dyn Mounter>) -> Self {
    Node {
      node_id: node_id.into(),
      lvm,
      mounter,
    }
  }
}

// Filesystem type and mount flags from the requested capability. The
// getters degrade to empty values when the capability carries no mount
// section, matching what a raw-block request would look like upstream.
fn mount_capability(cap: Option<csi::VolumeCapability>) -> (String, Vec<String>) {
  match cap.and_then(|c| c.access_type) {
    Some(csi::volume_capability::AccessType::Mount(m)) => (m.fs_type, m.mount_flags),
    _ => (String::new(), Vec::new()),
  }
}

/// Mounts the device at the target path, creating the directory when
/// missing and skipping the whole operation when the binding already
/// exists. Formatting (the only destructive step) is delegated to the
/// mounter and happens at most once per device.
fn mount_filesystem(
  mounter: &dyn Mounter,
  device: &Path,
  target: &str,
  fstype: &str,
  options: &[String],
) -> Result<(), Error> {
  if target.is_empty() {
    return Err(Error::invalid_argument("target path is empty"));
  }
  let target = Path::new(target);

  fs::create_dir_all(target).map_err(|source| Error::CreateTargetDir {
    path: target.to_path_buf(),
    source,
  })?;

  // The kernel records resolved paths in the mount table.
  let target: PathBuf = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());

  let current_mounts = mounter.mount_targets_for_device(device)?;
  if current_mounts.iter().any(|path| *path == target) {
    debug!(
      "device {} already mounted at {}",
      device.display(),
      target.display()
    );
    return Ok(());
  }

  mounter.safe_format_and_mount(device, &target, fstype, options)?;

  Ok(())
}

/// Unmounts the target path. A target that is not mounted, or no longer
/// exists, is success; only a live mount that fails to unmount is an
/// error.
fn unmount_filesystem(mounter: &dyn Mounter, target: &str) -> Result<(), Error> {
  let target = Path::new(target);

  match mounter.device_for_mount(target)? {
    None | Some((_, 0)) => {
      warn!(
        "Unmount skipped because volume not mounted: {}",
        target.display()
      );
      return Ok(());
    }
    Some(_) => {}
  }

  if !target.exists() {
    warn!(
      "Unmount skipped because path does not exist: {}",
      target.display()
    );
    return Ok(());
  }

  mounter.unmount(target)?;

  // Best effort: an unremovable empty directory must not fail the
  // unpublish.
  if let Err(e) = fs::remove_dir(target) {
    error!("failed to remove mount path {}: {}", target.display(), e);
  }

  info!("umount done, path {}", target.display());

  Ok(())
}

#[tonic::async_trait]
impl csi::node_server::Node for Node {
  async fn node_publish_volume(
    &self,
    request: Request<csi::NodePublishVolumeRequest>,
  ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
    let req = request.into_inner();
    info!(
      "NodePublishVolume: volume_id={:?} target_path={:?}",
      req.volume_id, req.target_path
    );

    let volume = VolumeRef::parse(&req.volume_id).map_err(Error::from)?;

    let (fs_type, mut mount_options) = mount_capability(req.volume_capability);
    if req.readonly {
      mount_options.push("ro".to_owned());
    }

    self
      .lvm
      .start_vg_lock(volume.group())
      .map_err(Error::Lock)?;
    self.lvm.activate_volume(&volume).map_err(Error::from)?;

    mount_filesystem(
      &*self.mounter,
      &volume.device_path(),
      &req.target_path,
      &fs_type,
      &mount_options,
    )?;

    Ok(Response::new(csi::NodePublishVolumeResponse {}))
  }

  async fn node_unpublish_volume(
    &self,
    request: Request<csi::NodeUnpublishVolumeRequest>,
  ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
    let req = request.into_inner();
    info!(
      "NodeUnpublishVolume: volume_id={:?} target_path={:?}",
      req.volume_id, req.target_path
    );

    let volume = VolumeRef::parse(&req.volume_id).map_err(Error::from)?;

    unmount_filesystem(&*self.mounter, &req.target_path)?;
    self.lvm.deactivate_volume(&volume).map_err(Error::from)?;

    Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
  }

  async fn node_get_info(
    &self,
    _request: Request<csi::NodeGetInfoRequest>,
  ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
    let response = csi::NodeGetInfoResponse {
      node_id: self.node_id.clone(),
      max_volumes_per_node: 0,
      accessible_topology: None,
    };

    debug!("NodeGetInfo: {:?}", response);

    Ok(Response::new(response))
  }

  /// No optional node capabilities: in particular stage/unstage is not
  /// advertised, consistent with those RPCs being unimplemented.
  async fn node_get_capabilities(
    &self,
    _request: Request<csi::NodeGetCapabilitiesRequest>,
  ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
    Ok(Response::new(csi::NodeGetCapabilitiesResponse {
      capabilities: Vec::new(),
    }))
  }

  async fn node_stage_volume(
    &self,
    _request: Request<csi::NodeStageVolumeRequest>,
  ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
    unsupported!("NodeStageVolume")
  }

  async fn node_unstage_volume(
    &self,
    _request: Request<csi::NodeUnstageVolumeRequest>,
  ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
    unsupported!("NodeUnstageVolume")
  }

  async fn node_get_volume_stats(
    &self,
    _request: Request<csi::NodeGetVolumeStatsRequest>,
  ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
    unsupported!("NodeGetVolumeStats")
  }

  async fn node_expand_volume(
    &self,
    _request: Request<csi::NodeExpandVolumeRequest>,
  ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
    unsupported!("NodeExpandVolume")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use csi::node_server::Node as NodeService;
  use csi::volume_capability::{access_mode::Mode, AccessMode, AccessType, MountVolume};
  use lvm_utils::FakeLvm;
  use mount_utils::{FakeAction, FakeMounter};
  use tonic::Code;

  const DEVICE: &str = "/dev/mapper/vg0-data";

  struct Fixture {
    lvm: Arc<FakeLvm>,
    mounter: Arc<FakeMounter>,
    node: Node,
    _dir: tempfile::TempDir,
    target: PathBuf,
  }

  fn fixture() -> Fixture {
    let lvm = Arc::new(FakeLvm::new());
    lvm
      .create_volume(&VolumeRef::parse("vg0/data").unwrap(), 1024)
      .unwrap();

    let mounter = Arc::new(FakeMounter::new(Vec::new()));
    let node = Node::new("node-1", lvm.clone(), mounter.clone());

    let dir = tempfile::tempdir().expect("failed to get tempdir");
    let target = dir.path().join("volume");

    Fixture {
      lvm,
      mounter,
      node,
      _dir: dir,
      target,
    }
  }

  fn publish_request(target: &Path, readonly: bool) -> csi::NodePublishVolumeRequest {
    csi::NodePublishVolumeRequest {
      volume_id: "vg0/data".to_owned(),
      target_path: target.display().to_string(),
      volume_capability: Some(csi::VolumeCapability {
        access_type: Some(AccessType::Mount(MountVolume {
          fs_type: "ext4".to_owned(),
          mount_flags: Vec::new(),
        })),
        access_mode: Some(AccessMode {
          mode: Mode::SingleNodeWriter as i32,
        }),
      }),
      readonly,
      ..Default::default()
    }
  }

  fn unpublish_request(target: &Path) -> csi::NodeUnpublishVolumeRequest {
    csi::NodeUnpublishVolumeRequest {
      volume_id: "vg0/data".to_owned(),
      target_path: target.display().to_string(),
    }
  }

  #[tokio::test]
  async fn publish_activates_formats_and_mounts() {
    let f = fixture();

    f.node
      .node_publish_volume(Request::new(publish_request(&f.target, false)))
      .await
      .unwrap();

    let volume = f.lvm.volume(&VolumeRef::parse("vg0/data").unwrap()).unwrap();
    assert!(volume.active, "publish must activate the volume");

    let canonical = fs::canonicalize(&f.target).unwrap();
    assert_eq!(
      f.mounter.get_log(),
      vec![
        FakeAction::Format {
          device: DEVICE.into(),
          fs_type: "ext4".into(),
        },
        FakeAction::Mount {
          source: DEVICE.into(),
          target: canonical,
          fs_type: "ext4".into(),
        },
      ]
    );
  }

  #[tokio::test]
  async fn republish_mounts_at_most_once() {
    let f = fixture();

    for _ in 0..2 {
      f.node
        .node_publish_volume(Request::new(publish_request(&f.target, false)))
        .await
        .unwrap();
    }

    let mounts = f
      .mounter
      .get_log()
      .into_iter()
      .filter(|a| matches!(a, FakeAction::Mount { .. }))
      .count();
    assert_eq!(mounts, 1, "second publish must not remount");
  }

  #[tokio::test]
  async fn publish_readonly_appends_ro_option() {
    let f = fixture();
    // Reformatting is out of the question for a read-only publish, so
    // the device must already carry a filesystem.
    f.mounter.set_disk_format(Path::new(DEVICE), "ext4");

    f.node
      .node_publish_volume(Request::new(publish_request(&f.target, true)))
      .await
      .unwrap();

    let mount_points = f.mounter.mount_points();
    assert_eq!(mount_points.len(), 1);
    assert!(mount_points[0].opts.iter().any(|o| o == "ro"));
  }

  #[tokio::test]
  async fn publish_rejects_malformed_volume_id() {
    let f = fixture();

    let mut request = publish_request(&f.target, false);
    request.volume_id = "not-a-handle".to_owned();

    let status = f
      .node
      .node_publish_volume(Request::new(request))
      .await
      .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
  }

  #[tokio::test]
  async fn publish_rejects_empty_target_path() {
    let f = fixture();

    let mut request = publish_request(&f.target, false);
    request.target_path = String::new();

    let status = f
      .node
      .node_publish_volume(Request::new(request))
      .await
      .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
  }

  #[tokio::test]
  async fn unpublish_unmounts_and_deactivates() {
    let f = fixture();
    f.node
      .node_publish_volume(Request::new(publish_request(&f.target, false)))
      .await
      .unwrap();

    f.node
      .node_unpublish_volume(Request::new(unpublish_request(&f.target)))
      .await
      .unwrap();

    assert!(f.mounter.mount_points().is_empty());
    assert!(!f.target.exists(), "emptied target directory is removed");

    let volume = f.lvm.volume(&VolumeRef::parse("vg0/data").unwrap()).unwrap();
    assert!(!volume.active, "unpublish must deactivate the volume");
  }

  #[tokio::test]
  async fn unpublish_of_unmounted_target_skips_the_unmount() {
    let f = fixture();
    f.lvm
      .activate_volume(&VolumeRef::parse("vg0/data").unwrap())
      .unwrap();

    f.node
      .node_unpublish_volume(Request::new(unpublish_request(&f.target)))
      .await
      .unwrap();

    assert!(
      f.mounter.get_log().is_empty(),
      "no unmount may be attempted for an unmounted target"
    );
    let volume = f.lvm.volume(&VolumeRef::parse("vg0/data").unwrap()).unwrap();
    assert!(!volume.active);
  }

  #[tokio::test]
  async fn node_info_reports_configured_id() {
    let f = fixture();

    let info = f
      .node
      .node_get_info(Request::new(csi::NodeGetInfoRequest {}))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(info.node_id, "node-1");
  }

  #[tokio::test]
  async fn node_advertises_no_optional_capabilities() {
    let f = fixture();

    let capabilities = f
      .node
      .node_get_capabilities(Request::new(csi::NodeGetCapabilitiesRequest {}))
      .await
      .unwrap()
      .into_inner()
      .capabilities;

    assert!(capabilities.is_empty());
  }

  #[tokio::test]
  async fn stage_is_unimplemented() {
    let f = fixture();

    let status = f
      .node
      .node_stage_volume(Request::new(csi::NodeStageVolumeRequest::default()))
      .await
      .unwrap_err();

    assert_eq!(status.code(), Code::Unimplemented);
  }
}
