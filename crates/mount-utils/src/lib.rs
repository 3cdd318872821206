//! Mount-table reading and mount/unmount/format operations.
//!
//! [`Mounter`] is the set of methods the node service needs from the
//! host: the primitive command wrappers plus the derived lookups its
//! idempotency rules are built on ("which paths is this device mounted
//! at", "which device backs this path"). [`OsMounter`] shells out to the
//! usual tools; [`FakeMounter`] keeps the mount table in memory so the
//! logic can be tested without a real filesystem.

cfg_if::cfg_if! {
  if #[cfg(unix)] {
    mod os;
    pub use os::OsMounter;
  } else {
    compile_error!("Only cfg(unix) is supported at this time")
  }
}

mod fake;

pub use fake::{FakeAction, FakeMounter};

use std::{
  fs, io,
  path::{Path, PathBuf},
  result,
};
use thiserror::Error;

pub type Result<T> = result::Result<T, MountError>;

const DEFAULT_FS_TYPE: &str = "ext4";

/// MountPoint represents a single line in /proc/mounts or /etc/fstab.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountPoint {
  pub device: PathBuf,
  pub path: PathBuf,
  pub ty: String,
  pub opts: Vec<String>,
  pub freq: isize,
  pub pass: isize,
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("File system mismatch: {0}")]
  FilesystemMismatch(String),
  #[error("Unformatted read only: {0}")]
  UnformattedReadOnly(String),
  #[error("Format failed: {0}")]
  FormatFailed(String, #[source] io::Error),
  #[error("Get disk format failed: {0}")]
  GetDiskFormatFailed(String, #[source] io::Error),
  #[error("Unknown mount error: {0}")]
  UnknownMountError(
    #[from]
    #[source]
    io::Error,
  ),
}

impl MountError {
  fn new(msg: impl Into<String>) -> Self {
    MountError::UnknownMountError(io::Error::new(io::ErrorKind::Other, msg.into()))
  }
}

/// Interface defines the set of methods to allow for mount operations on
/// a system.
pub trait Mounter: Send + Sync {
  /// Mounts device to target as fstype with given options.
  fn mount(&self, device: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()>;

  /// Unmount unmounts given target.
  fn unmount(&self, target: &Path) -> Result<()>;

  /// List returns a list of all mounted filesystems.
  fn list(&self) -> Result<Vec<MountPoint>>;

  /// Probes the filesystem on a device. `Ok(None)` means the device
  /// carries no recognizable filesystem; a probe-tool failure is an
  /// error and is never reported as "unformatted".
  fn get_disk_format(&self, device: &Path) -> Result<Option<String>>;

  /// Formats the device with the given filesystem. Destructive.
  fn format(&self, device: &Path, fstype: &str) -> Result<()>;

  /// All paths the given device is currently mounted at.
  fn mount_targets_for_device(&self, device: &Path) -> Result<Vec<PathBuf>> {
    Ok(
      self
        .list()?
        .into_iter()
        .filter(|mp| mp.device == device)
        .map(|mp| mp.path)
        .collect(),
    )
  }

  /// The device backing a mount target, along with the number of mount
  /// table entries referencing that same device.
  fn device_for_mount(&self, target: &Path) -> Result<Option<(PathBuf, usize)>> {
    let mps = self.list()?;

    // If the target is a symlink, the kernel records the resolved path.
    let target = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());

    Ok(
      mps
        .iter()
        .find(|mp| mp.path == target)
        .map(|mp| mp.device.clone())
        .map(|device| {
          let ref_count = mps.iter().filter(|mp| mp.device == device).count();
          (device, ref_count)
        }),
    )
  }

  /// Formats the device if (and only if) it carries no filesystem yet,
  /// then mounts it at target.
  ///
  /// An existing filesystem of a different type than requested is an
  /// error rather than a reformat, and a read-only request against an
  /// unformatted device fails instead of formatting it.
  fn safe_format_and_mount(
    &self,
    device: &Path,
    target: &Path,
    fstype: &str,
    options: &[String],
  ) -> Result<()> {
    let readonly = options.iter().any(|o| o == "ro");

    match self.get_disk_format(device)? {
      None => {
        if readonly {
          return Err(MountError::UnformattedReadOnly(format!(
            "cannot mount unformatted device {} read-only",
            device.display()
          )));
        }

        let fstype = if fstype.is_empty() {
          DEFAULT_FS_TYPE
        } else {
          fstype
        };
        self.format(device, fstype)?;
        self.mount(device, target, fstype, options)
      }
      Some(existing) => {
        if !fstype.is_empty() && existing != fstype {
          return Err(MountError::FilesystemMismatch(format!(
            "device {} already contains a {} filesystem, {} requested",
            device.display(),
            existing,
            fstype
          )));
        }

        self.mount(device, target, fstype, options)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fake::{FakeAction, FakeMounter};

  fn mp_simple(device: &str, path: &str) -> MountPoint {
    MountPoint {
      device: device.into(),
      path: path.into(),
      ty: String::new(),
      opts: Vec::new(),
      freq: 0,
      pass: 0,
    }
  }

  #[test]
  fn mount_targets_for_device() {
    let fm = FakeMounter::new(vec![
      mp_simple("/dev/mapper/vg0-data", "/var/lib/kubelet/pods/a/volumes/data"),
      mp_simple("/dev/mapper/vg0-data", "/var/lib/kubelet/pods/b/volumes/data"),
      mp_simple("/dev/mapper/vg0-logs", "/var/lib/kubelet/pods/a/volumes/logs"),
    ]);

    let targets = fm
      .mount_targets_for_device(Path::new("/dev/mapper/vg0-data"))
      .unwrap();

    assert_eq!(
      targets,
      vec![
        PathBuf::from("/var/lib/kubelet/pods/a/volumes/data"),
        PathBuf::from("/var/lib/kubelet/pods/b/volumes/data"),
      ]
    );
  }

  #[test]
  fn device_for_mount_counts_references() {
    let fm = FakeMounter::new(vec![
      mp_simple("/dev/disk/by-path/prefix-lun-1", "/mnt/111"),
      mp_simple("/dev/disk/by-path/prefix-lun-1", "/mnt/222"),
    ]);

    let (device, refs) = fm
      .device_for_mount(Path::new("/mnt/222"))
      .unwrap()
      .expect("mount should resolve to a device");

    assert_eq!(device, PathBuf::from("/dev/disk/by-path/prefix-lun-1"));
    assert_eq!(refs, 2);

    assert_eq!(fm.device_for_mount(Path::new("/mnt/333")).unwrap(), None);
  }

  #[test]
  fn format_and_mount_formats_unformatted_device() {
    let fm = FakeMounter::new(Vec::new());
    let device = Path::new("/dev/mapper/vg0-data");
    let target = Path::new("/mnt/x");

    fm.safe_format_and_mount(device, target, "ext4", &[]).unwrap();

    assert_eq!(
      fm.get_log(),
      vec![
        FakeAction::Format {
          device: device.into(),
          fs_type: "ext4".into(),
        },
        FakeAction::Mount {
          source: device.into(),
          target: target.into(),
          fs_type: "ext4".into(),
        },
      ]
    );
  }

  #[test]
  fn format_and_mount_skips_formatted_device() {
    let fm = FakeMounter::new(Vec::new());
    let device = Path::new("/dev/mapper/vg0-data");
    fm.set_disk_format(device, "ext4");

    fm.safe_format_and_mount(device, Path::new("/mnt/x"), "ext4", &[])
      .unwrap();

    assert!(fm
      .get_log()
      .iter()
      .all(|a| !matches!(a, FakeAction::Format { .. })));
  }

  #[test]
  fn format_and_mount_rejects_mismatched_filesystem() {
    let fm = FakeMounter::new(Vec::new());
    let device = Path::new("/dev/mapper/vg0-data");
    fm.set_disk_format(device, "xfs");

    let err = fm
      .safe_format_and_mount(device, Path::new("/mnt/x"), "ext4", &[])
      .unwrap_err();

    assert!(matches!(err, MountError::FilesystemMismatch(_)));
    assert!(fm.get_log().is_empty());
  }

  #[test]
  fn format_and_mount_rejects_readonly_unformatted() {
    let fm = FakeMounter::new(Vec::new());

    let err = fm
      .safe_format_and_mount(
        Path::new("/dev/mapper/vg0-data"),
        Path::new("/mnt/x"),
        "ext4",
        &["ro".to_owned()],
      )
      .unwrap_err();

    assert!(matches!(err, MountError::UnformattedReadOnly(_)));
    assert!(fm.get_log().is_empty());
  }

  #[test]
  fn format_and_mount_defaults_filesystem_when_unspecified() {
    let fm = FakeMounter::new(Vec::new());
    let device = Path::new("/dev/mapper/vg0-data");

    fm.safe_format_and_mount(device, Path::new("/mnt/x"), "", &[])
      .unwrap();

    assert_eq!(
      fm.get_log()[0],
      FakeAction::Format {
        device: device.into(),
        fs_type: DEFAULT_FS_TYPE.into(),
      }
    );
  }
}
