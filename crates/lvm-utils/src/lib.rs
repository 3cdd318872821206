//! Logical-volume primitives for shared (lvmlockd-managed) volume groups.
//!
//! The [`Lvm`] trait is the narrow capability the CSI services program
//! against: start a volume group's shared lock, create a logical volume,
//! and toggle its activation. [`LvmCommands`] drives the real `lvm2`
//! command-line tools; [`FakeLvm`] is an in-memory stand-in for tests.
//!
//! [`VolumeRef`] is the structured volume identifier. It is encoded to
//! (and decoded from) the opaque `<group>/<name>` handle exactly once, at
//! the RPC boundary; internal code passes the value type around and
//! never re-parses strings.

mod commands;
mod fake;
mod volume;

use std::{io, result};
use thiserror::Error;

pub use commands::{CreateOutcome, Lvm, LvmCommands};
pub use fake::{FakeLvm, FakeVolume, LvmAction};
pub use volume::{validate_name, VolumeRef};

pub type Result<T> = result::Result<T, LvmError>;

#[derive(Debug, Error)]
pub enum LvmError {
  #[error("invalid name {name:?}: {reason}")]
  InvalidName { name: String, reason: &'static str },
  #[error("malformed volume id {0:?}: expected <group>/<name>")]
  MalformedVolumeId(String),
  #[error("{program} failed: {stderr}")]
  CommandFailed {
    program: &'static str,
    code: Option<i32>,
    stderr: String,
  },
  #[error("failed to run {program}: {source}")]
  Spawn {
    program: &'static str,
    #[source]
    source: io::Error,
  },
}
