use crate::{LvmError, Result};
use std::{fmt, path::PathBuf};

/// A logical volume, identified by its volume group and name.
///
/// The orchestrator only ever sees the encoded form `<group>/<name>`,
/// produced by [`fmt::Display`] when the volume is created and decoded by
/// [`VolumeRef::parse`] on every node-side call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VolumeRef {
  group: String,
  name: String,
}

impl VolumeRef {
  /// Builds a reference from already separated components, validating
  /// both against the naming rules.
  pub fn new(name: &str, group: &str) -> Result<Self> {
    validate_name(name)?;
    validate_name(group)?;

    Ok(VolumeRef {
      group: group.to_owned(),
      name: name.to_owned(),
    })
  }

  /// Decodes an opaque volume handle.
  ///
  /// The handle must contain exactly one separator with a valid name on
  /// each side; anything else is rejected instead of trusting
  /// caller-supplied input.
  pub fn parse(id: &str) -> Result<Self> {
    match id.split_once('/') {
      Some((group, name)) => {
        VolumeRef::new(name, group).map_err(|_| LvmError::MalformedVolumeId(id.to_owned()))
      }
      None => Err(LvmError::MalformedVolumeId(id.to_owned())),
    }
  }

  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[inline]
  pub fn group(&self) -> &str {
    &self.group
  }

  /// The device node device-mapper creates for the activated volume.
  ///
  /// Device-mapper doubles every literal hyphen in the group and name and
  /// joins the two with a single hyphen, so the node can locate the
  /// device directly without querying LVM.
  pub fn device_path(&self) -> PathBuf {
    let group = self.group.replace('-', "--");
    let name = self.name.replace('-', "--");

    PathBuf::from(format!("/dev/mapper/{}-{}", group, name))
  }
}

impl fmt::Display for VolumeRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.group, self.name)
  }
}

/// Checks a volume or volume group name: non-empty, no path separator.
pub fn validate_name(name: &str) -> Result<()> {
  if name.is_empty() {
    return Err(LvmError::InvalidName {
      name: name.to_owned(),
      reason: "name is empty",
    });
  }

  if name.contains('/') {
    return Err(LvmError::InvalidName {
      name: name.to_owned(),
      reason: "name can not contain '/'",
    });
  }

  Ok(())
}
