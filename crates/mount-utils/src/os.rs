use crate::{MountError, MountPoint, Mounter, Result};
use duct::cmd;
use std::{
  ffi::OsString,
  fmt::Write,
  fs, io,
  path::{Path, PathBuf},
};
use tracing::{error, info};
use which::which;

const PROC_MOUNTS_PATH: &str = "/proc/mounts";
const MAX_LIST_TRIES: usize = 3;
const EXPECTED_FIELDS_PER_MOUNTS_LINE: usize = 6;

/// [`Mounter`] backed by the host's mount table and the mount(8),
/// umount(8), blkid(8) and mkfs(8) tools.
pub struct OsMounter;

impl OsMounter {
  pub fn new() -> Self {
    OsMounter
  }
}

impl Default for OsMounter {
  fn default() -> Self {
    OsMounter::new()
  }
}

impl Mounter for OsMounter {
  fn mount(&self, device: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()> {
    let (mount_args, log_str) = make_mount_args(device, target, fstype, options);

    info!("Mounting cmd mount with arguments ({})", log_str);
    match cmd("mount", mount_args).stderr_to_stdout().run() {
      Ok(_) => Ok(()),
      Err(e) => {
        error!("Mount failed: {:?}", e);
        Err(e.into())
      }
    }
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    info!("Unmounting {}", target.display());
    cmd!("umount", target).stderr_to_stdout().run()?;

    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    let content = consistent_read(Path::new(PROC_MOUNTS_PATH), MAX_LIST_TRIES)?;

    parse_proc_mounts(&content)
  }

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    let output = cmd!(
      "blkid",
      "-p",
      "-s",
      "TYPE",
      "-s",
      "PTTYPE",
      "-o",
      "export",
      device
    )
    .stdout_capture()
    .stderr_capture()
    .unchecked()
    .run()
    .map_err(|e| MountError::GetDiskFormatFailed(device.display().to_string(), e))?;

    match output.status.code() {
      Some(0) => {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (fs_type, pt_type) = parse_blkid_export(&stdout);

        if let Some(pt) = pt_type {
          // A partition table is not a mountable filesystem and must
          // never be formatted over.
          return Err(MountError::GetDiskFormatFailed(
            device.display().to_string(),
            io::Error::new(
              io::ErrorKind::Other,
              format!("device contains a partition table ({})", pt),
            ),
          ));
        }

        Ok(fs_type)
      }
      // blkid exits with 2 when it finds nothing recognizable on the
      // device.
      Some(2) => Ok(None),
      _ => Err(MountError::GetDiskFormatFailed(
        device.display().to_string(),
        io::Error::new(
          io::ErrorKind::Other,
          String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ),
      )),
    }
  }

  fn format(&self, device: &Path, fstype: &str) -> Result<()> {
    let mkfs = which(format!("mkfs.{}", fstype)).map_err(|e| {
      MountError::FormatFailed(
        device.display().to_string(),
        io::Error::new(io::ErrorKind::NotFound, e.to_string()),
      )
    })?;

    info!(
      "Formatting device {} with a {} filesystem",
      device.display(),
      fstype
    );
    let output = cmd(mkfs, vec![OsString::from(device)])
      .stdout_capture()
      .stderr_capture()
      .unchecked()
      .run()
      .map_err(|e| MountError::FormatFailed(device.display().to_string(), e))?;

    if output.status.success() {
      info!("Device {} formatted with {} filesystem", device.display(), fstype);
      Ok(())
    } else {
      Err(MountError::FormatFailed(
        device.display().to_string(),
        io::Error::new(
          io::ErrorKind::Other,
          String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ),
      ))
    }
  }
}

// Builds the arguments to the mount(8) command:
//   mount [-t $fstype] [-o $options] $device $target
// Also returns the rendered command line for logging.
fn make_mount_args(
  device: &Path,
  target: &Path,
  fstype: &str,
  options: &[String],
) -> (Vec<OsString>, String) {
  let mut mount_args: Vec<OsString> = Vec::new();
  let mut log_str = String::new();

  if !fstype.is_empty() {
    mount_args.push("-t".into());
    mount_args.push(fstype.into());
    write!(log_str, "-t {} ", fstype).unwrap();
  }

  if !options.is_empty() {
    let arg = options.join(",");
    mount_args.push("-o".into());
    mount_args.push(arg.clone().into());
    write!(log_str, "-o {} ", arg).unwrap();
  }

  mount_args.push(device.into());
  mount_args.push(target.into());
  write!(log_str, "{} {}", device.display(), target.display()).unwrap();

  (mount_args, log_str)
}

fn parse_blkid_export(stdout: &str) -> (Option<String>, Option<String>) {
  let mut fs_type = None;
  let mut pt_type = None;

  for line in stdout.lines() {
    if let Some(value) = line.strip_prefix("TYPE=") {
      fs_type = Some(value.to_owned());
    } else if let Some(value) = line.strip_prefix("PTTYPE=") {
      pt_type = Some(value.to_owned());
    }
  }

  (fs_type, pt_type)
}

/// ConsistentRead repeatedly reads a file until it gets the same content
/// twice. This is useful when reading files in /proc that are larger than
/// page size and kernel may modify them between individual read()
/// syscalls.
fn consistent_read(path: &Path, attempts: usize) -> io::Result<Vec<u8>> {
  let mut old_content = fs::read(path)?;

  for _ in 0..attempts {
    let new_content = fs::read(path)?;
    if new_content == old_content {
      return Ok(new_content);
    }

    // Files are different, continue reading
    old_content = new_content;
  }

  Err(io::Error::new(
    io::ErrorKind::Other,
    format!(
      "could not get consistent content of '{}' after {} attempts",
      path.display(),
      attempts
    ),
  ))
}

fn parse_proc_mounts(content: &[u8]) -> Result<Vec<MountPoint>> {
  let s =
    std::str::from_utf8(content).map_err(|_| MountError::new("proc mounts contain invalid UTF8"))?;

  let mut out = Vec::new();
  for line in s.lines() {
    if line.is_empty() {
      continue;
    }

    let fields = line.split_whitespace().collect::<Vec<_>>();
    if fields.len() != EXPECTED_FIELDS_PER_MOUNTS_LINE {
      return Err(MountError::new(format!(
        "wrong number of fields (expected {}, got {})",
        EXPECTED_FIELDS_PER_MOUNTS_LINE,
        fields.len()
      )));
    }

    let device = PathBuf::from(fields[0]);
    let path = PathBuf::from(fields[1]);
    let ty = fields[2].to_owned();
    let opts = fields[3].split(',').map(ToOwned::to_owned).collect();
    let freq = fields[4]
      .parse()
      .map_err(|e| MountError::new(format!("invalid freq: {:?}", e)))?;
    let pass = fields[5]
      .parse()
      .map_err(|e| MountError::new(format!("invalid pass: {:?}", e)))?;

    out.push(MountPoint {
      device,
      path,
      ty,
      opts,
      freq,
      pass,
    })
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test]
  fn read_proc_mounts() {
    let success_case = "
/dev/0 /path/to/0 type0 flags 0 0
/dev/1    /path/to/1   type1\tflags 1 1
/dev/2 /path/to/2 type2 flags,1,2=3 2 2
";

    let mounts = parse_proc_mounts(success_case.as_ref()).expect("parse succeeded");
    assert_eq!(mounts.len(), 3);
    assert_eq!(
      mounts[2],
      MountPoint {
        device: "/dev/2".into(),
        path: "/path/to/2".into(),
        ty: "type2".into(),
        opts: vec!["flags".into(), "1".into(), "2=3".into()],
        freq: 2,
        pass: 2,
      }
    );

    let error_cases = &[
      "/dev/0 /path/to/mount\n",
      "/dev/1 /path/to/mount type flags a 0\n",
      "/dev/2 /path/to/mount type flags 0 b\n",
    ];
    for ec in error_cases {
      parse_proc_mounts(ec.as_ref()).expect_err(&format!("Error case '{}' should fail", ec.trim()));
    }
  }

  #[test]
  fn consistent_read_returns_stable_content() {
    let dir = tempfile::tempdir().expect("failed to get tempdir");
    let file = dir.path().join("mounts");
    fs::write(&file, "/dev/0 /path/to/0 type0 flags 0 0\n").unwrap();

    let content = consistent_read(&file, MAX_LIST_TRIES).expect("read succeeded");
    assert_eq!(content, fs::read(&file).unwrap());
  }

  #[test_case("ext4", &["rw", "noatime"], "-t ext4 -o rw,noatime /dev/sda /mnt/x")]
  #[test_case("", &["ro"], "-o ro /dev/sda /mnt/x")]
  #[test_case("", &[], "/dev/sda /mnt/x")]
  fn mount_args(fstype: &str, options: &[&str], expected: &str) {
    let options = options.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let (args, log_str) = make_mount_args(
      Path::new("/dev/sda"),
      Path::new("/mnt/x"),
      fstype,
      &options,
    );

    assert_eq!(log_str, expected);
    assert_eq!(
      args,
      expected
        .split(' ')
        .map(OsString::from)
        .collect::<Vec<_>>()
    );
  }

  #[test]
  fn blkid_export_output() {
    let (fs, pt) = parse_blkid_export("DEVNAME=/dev/sda\nTYPE=ext4\n");
    assert_eq!(fs.as_deref(), Some("ext4"));
    assert_eq!(pt, None);

    let (fs, pt) = parse_blkid_export("DEVNAME=/dev/sda\nPTTYPE=dos\n");
    assert_eq!(fs, None);
    assert_eq!(pt.as_deref(), Some("dos"));
  }
}
