use crate::{CreateOutcome, Lvm, LvmError, Result, VolumeRef};
use std::{collections::HashMap, sync::Mutex};
use tracing::info;

/// One recorded call against [`FakeLvm`], in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LvmAction {
  StartLock { group: String },
  Create { volume: String, size_bytes: u64 },
  Activate { volume: String },
  Deactivate { volume: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FakeVolume {
  pub size_bytes: u64,
  pub active: bool,
}

struct FakeLvmInner {
  volumes: HashMap<String, FakeVolume>,
  log: Vec<LvmAction>,
  deny_locks: bool,
}

/// In-memory [`Lvm`] implementation for tests.
///
/// Records every call so tests can assert on ordering, and keeps a volume
/// map so idempotency (duplicate creates, repeated activation toggles)
/// behaves like the real volume manager.
pub struct FakeLvm(Mutex<FakeLvmInner>);

impl FakeLvm {
  pub fn new() -> Self {
    FakeLvm(Mutex::new(FakeLvmInner {
      volumes: HashMap::new(),
      log: Vec::new(),
      deny_locks: false,
    }))
  }

  /// Makes every subsequent `start_vg_lock` call fail, as if the lock
  /// manager were unreachable.
  pub fn deny_locks(&self) {
    self.0.lock().unwrap().deny_locks = true;
  }

  pub fn volume(&self, volume: &VolumeRef) -> Option<FakeVolume> {
    self
      .0
      .lock()
      .unwrap()
      .volumes
      .get(&volume.to_string())
      .copied()
  }

  pub fn volume_count(&self) -> usize {
    self.0.lock().unwrap().volumes.len()
  }

  pub fn get_log(&self) -> Vec<LvmAction> {
    self.0.lock().unwrap().log.clone()
  }

  pub fn reset_log(&self) {
    self.0.lock().unwrap().log.clear();
  }
}

impl Default for FakeLvm {
  fn default() -> Self {
    FakeLvm::new()
  }
}

impl Lvm for FakeLvm {
  fn start_vg_lock(&self, group: &str) -> Result<()> {
    let mut inner = self.0.lock().unwrap();
    inner.log.push(LvmAction::StartLock {
      group: group.to_owned(),
    });

    if inner.deny_locks {
      return Err(LvmError::CommandFailed {
        program: "vgchange",
        code: Some(5),
        stderr: format!("VG {} lock failed: lockspace not available", group),
      });
    }

    Ok(())
  }

  fn create_volume(&self, volume: &VolumeRef, size_bytes: u64) -> Result<CreateOutcome> {
    let mut inner = self.0.lock().unwrap();
    let key = volume.to_string();
    inner.log.push(LvmAction::Create {
      volume: key.clone(),
      size_bytes,
    });

    if inner.volumes.contains_key(&key) {
      return Ok(CreateOutcome::AlreadyExists);
    }

    info!("fake lvm: created {}", key);
    inner.volumes.insert(
      key,
      FakeVolume {
        size_bytes,
        active: false,
      },
    );

    Ok(CreateOutcome::Created)
  }

  fn activate_volume(&self, volume: &VolumeRef) -> Result<()> {
    self.set_active(volume, true)
  }

  fn deactivate_volume(&self, volume: &VolumeRef) -> Result<()> {
    self.set_active(volume, false)
  }
}

impl FakeLvm {
  fn set_active(&self, volume: &VolumeRef, active: bool) -> Result<()> {
    let mut inner = self.0.lock().unwrap();
    let key = volume.to_string();
    inner.log.push(if active {
      LvmAction::Activate {
        volume: key.clone(),
      }
    } else {
      LvmAction::Deactivate {
        volume: key.clone(),
      }
    });

    match inner.volumes.get_mut(&key) {
      Some(v) => {
        v.active = active;
        Ok(())
      }
      None => Err(LvmError::CommandFailed {
        program: "lvchange",
        code: Some(5),
        stderr: format!("Failed to find logical volume \"{}\"", key),
      }),
    }
  }
}
