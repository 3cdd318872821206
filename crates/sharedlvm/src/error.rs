use lvm_utils::LvmError;
use mount_utils::MountError;
use std::{io, path::PathBuf};
use thiserror::Error;
use tonic::{Code, Status};

/// Failure modes of the volume lifecycle operations.
///
/// Caller misuse (`InvalidArgument`, malformed handles, bad names) maps
/// to `INVALID_ARGUMENT`; everything the backend tools report maps to
/// `INTERNAL` and is left to the orchestrator to retry. The handlers
/// themselves never retry anything.
#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  InvalidArgument(String),
  #[error("failed to activate volume group lock: {0}")]
  Lock(#[source] LvmError),
  #[error("could not create mount target {path:?}: {source}")]
  CreateTargetDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error(transparent)]
  Lvm(#[from] LvmError),
  #[error(transparent)]
  Mount(#[from] MountError),
}

impl Error {
  pub fn invalid_argument(msg: impl Into<String>) -> Self {
    Error::InvalidArgument(msg.into())
  }
}

impl From<Error> for Status {
  fn from(value: Error) -> Self {
    let code = match &value {
      Error::InvalidArgument(_) => Code::InvalidArgument,
      Error::Lvm(LvmError::InvalidName { .. }) | Error::Lvm(LvmError::MalformedVolumeId(_)) => {
        Code::InvalidArgument
      }
      Error::Lock(_) | Error::CreateTargetDir { .. } | Error::Lvm(_) | Error::Mount(_) => {
        Code::Internal
      }
    };

    Status::new(code, value.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn invalid_argument_maps_to_invalid_argument() {
    let status = Status::from(Error::invalid_argument("target path is empty"));
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "target path is empty");
  }

  #[test]
  fn malformed_volume_id_maps_to_invalid_argument() {
    let status = Status::from(Error::Lvm(LvmError::MalformedVolumeId("oops".into())));
    assert_eq!(status.code(), Code::InvalidArgument);
  }

  #[test]
  fn backend_failures_map_to_internal() {
    let status = Status::from(Error::Lock(LvmError::CommandFailed {
      program: "vgchange",
      code: Some(5),
      stderr: "lockspace not available".into(),
    }));

    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("lockspace not available"));
  }
}
