use crate::{MountPoint, Mounter, Result};
use std::{
  collections::HashMap,
  fs,
  path::{Path, PathBuf},
  sync::Mutex,
};
use tracing::info;

/// One recorded call against [`FakeMounter`], in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FakeAction {
  Mount {
    source: PathBuf,
    target: PathBuf,
    fs_type: String,
  },
  Unmount {
    target: PathBuf,
  },
  Format {
    device: PathBuf,
    fs_type: String,
  },
}

struct FakeMounterInner {
  mount_points: Vec<MountPoint>,
  disk_formats: HashMap<PathBuf, String>,
  log: Vec<FakeAction>,
}

/// In-memory [`Mounter`] implementation for tests: mount table entries
/// live in a vector, disk formats in a map, and every mutating call is
/// appended to an action log.
pub struct FakeMounter(Mutex<FakeMounterInner>);

impl FakeMounter {
  pub fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    let mount_points = mps.into_iter().collect();

    FakeMounter(Mutex::new(FakeMounterInner {
      mount_points,
      disk_formats: HashMap::new(),
      log: Vec::new(),
    }))
  }

  /// Pretends the device already carries the given filesystem.
  pub fn set_disk_format(&self, device: &Path, fstype: &str) {
    self
      .0
      .lock()
      .unwrap()
      .disk_formats
      .insert(device.to_path_buf(), fstype.to_owned());
  }

  pub fn mount_points(&self) -> Vec<MountPoint> {
    self.0.lock().unwrap().mount_points.clone()
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.0.lock().unwrap().log.clone()
  }

  pub fn reset_log(&self) {
    self.0.lock().unwrap().log.clear();
  }
}

impl Mounter for FakeMounter {
  fn mount(&self, device: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()> {
    let mut inner = self.0.lock().unwrap();

    // If target is a symlink, get its absolute path
    let target = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());

    inner.mount_points.push(MountPoint {
      device: device.to_path_buf(),
      path: target.clone(),
      ty: fstype.to_owned(),
      opts: options.to_vec(),
      freq: 0,
      pass: 0,
    });
    info!(
      "Fake mounter: mounted {} to {}",
      device.display(),
      target.display()
    );
    inner.log.push(FakeAction::Mount {
      source: device.to_path_buf(),
      target,
      fs_type: fstype.to_owned(),
    });

    Ok(())
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    let mut inner = self.0.lock().unwrap();

    // If target is a symlink, get its absolute path
    let target = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());

    if let Some((i, mp)) = inner
      .mount_points
      .iter()
      .enumerate()
      .find(|(_, mp)| mp.path == target)
    {
      info!(
        "Fake mounter: unmounted {} from {}",
        mp.device.display(),
        target.display()
      );

      inner.mount_points.remove(i);
    }

    inner.log.push(FakeAction::Unmount { target });

    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    Ok(self.0.lock().unwrap().mount_points.clone())
  }

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    Ok(self.0.lock().unwrap().disk_formats.get(device).cloned())
  }

  fn format(&self, device: &Path, fstype: &str) -> Result<()> {
    let mut inner = self.0.lock().unwrap();

    inner
      .disk_formats
      .insert(device.to_path_buf(), fstype.to_owned());
    inner.log.push(FakeAction::Format {
      device: device.to_path_buf(),
      fs_type: fstype.to_owned(),
    });

    Ok(())
  }
}
