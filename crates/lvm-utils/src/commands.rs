use crate::{LvmError, Result, VolumeRef};
use duct::cmd;
use std::process::Output;
use tracing::{debug, info};

/// Result of a create request against the volume manager.
///
/// "Already exists" is derived from the create call itself rather than a
/// separate existence probe, so two racing creates for the same volume
/// both converge on a single logical volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
  Created,
  AlreadyExists,
}

/// The logical-volume operations the CSI services depend on.
///
/// Every method maps to one blocking invocation of the lvm2 tools; all of
/// them are idempotent at the LVM level. The volume group's shared lock
/// must be started before any of the volume operations touch it. Lock
/// state is never cached: it can be lost behind our back (host reboot,
/// lock-manager restart), so callers re-request it before each operation.
pub trait Lvm: Send + Sync {
  /// Starts the cluster-wide shared lock for a volume group.
  fn start_vg_lock(&self, group: &str) -> Result<()>;

  /// Creates the logical volume at the requested size in bytes, leaving
  /// it deactivated. Returns [`CreateOutcome::AlreadyExists`] when a
  /// volume of that name is already present in the group.
  fn create_volume(&self, volume: &VolumeRef, size_bytes: u64) -> Result<CreateOutcome>;

  /// Makes the volume's device node present on this host.
  fn activate_volume(&self, volume: &VolumeRef) -> Result<()>;

  /// Removes the volume's device node from this host.
  fn deactivate_volume(&self, volume: &VolumeRef) -> Result<()>;
}

/// [`Lvm`] implementation backed by the lvm2 command-line tools.
pub struct LvmCommands;

impl LvmCommands {
  pub fn new() -> Self {
    LvmCommands
  }

  fn run(expr: duct::Expression, program: &'static str) -> Result<Output> {
    expr
      .stdout_capture()
      .stderr_capture()
      .unchecked()
      .run()
      .map_err(|source| LvmError::Spawn { program, source })
  }
}

impl Default for LvmCommands {
  fn default() -> Self {
    LvmCommands::new()
  }
}

impl Lvm for LvmCommands {
  fn start_vg_lock(&self, group: &str) -> Result<()> {
    debug!("starting shared lock for volume group {}", group);
    let output = Self::run(cmd!("vgchange", "--lockstart", group), "vgchange")?;

    if output.status.success() {
      Ok(())
    } else {
      Err(command_failed("vgchange", &output))
    }
  }

  fn create_volume(&self, volume: &VolumeRef, size_bytes: u64) -> Result<CreateOutcome> {
    let size = format!("{}b", size_bytes);
    let output = Self::run(
      cmd!("lvcreate", "-L", size, "-n", volume.name(), volume.group()),
      "lvcreate",
    )?;

    if output.status.success() {
      info!("created logical volume {} ({} bytes)", volume, size_bytes);
      return Ok(CreateOutcome::Created);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    match create_outcome_from_failure(&stderr) {
      Some(outcome) => {
        debug!("logical volume {} already exists", volume);
        Ok(outcome)
      }
      None => Err(command_failed("lvcreate", &output)),
    }
  }

  fn activate_volume(&self, volume: &VolumeRef) -> Result<()> {
    debug!("activating logical volume {}", volume);
    let output = Self::run(cmd!("lvchange", "-ay", volume.to_string()), "lvchange")?;

    if output.status.success() {
      Ok(())
    } else {
      Err(command_failed("lvchange", &output))
    }
  }

  fn deactivate_volume(&self, volume: &VolumeRef) -> Result<()> {
    debug!("deactivating logical volume {}", volume);
    let output = Self::run(cmd!("lvchange", "-an", volume.to_string()), "lvchange")?;

    if output.status.success() {
      Ok(())
    } else {
      Err(command_failed("lvchange", &output))
    }
  }
}

// lvcreate reports a duplicate name on stderr and exits non-zero; that
// outcome is success for an idempotent create.
fn create_outcome_from_failure(stderr: &str) -> Option<CreateOutcome> {
  if stderr.contains("already exists") {
    Some(CreateOutcome::AlreadyExists)
  } else {
    None
  }
}

fn command_failed(program: &'static str, output: &Output) -> LvmError {
  LvmError::CommandFailed {
    program,
    code: output.status.code(),
    stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn duplicate_create_failure_is_already_exists() {
    let stderr = "  Logical Volume \"data\" already exists in volume group \"vg0\"\n";
    assert_eq!(
      create_outcome_from_failure(stderr),
      Some(CreateOutcome::AlreadyExists)
    );
  }

  #[test]
  fn other_create_failures_propagate() {
    let stderr = "  Volume group \"vg0\" has insufficient free space\n";
    assert_eq!(create_outcome_from_failure(stderr), None);
  }
}
