//! CSI plugin exposing shared (lvmlockd-managed) LVM volume groups as
//! dynamically provisioned, mountable volumes.
//!
//! Three gRPC services share one process: [`Identity`] (discovery and
//! health), [`Controller`] (provision and validate, one instance per
//! cluster) and [`Node`] (activate/mount and the inverse, one instance
//! per host). The services are stateless; the only cross-request state
//! is the external volume-group/logical-volume state reached through the
//! injected [`lvm_utils::Lvm`] and [`mount_utils::Mounter`] capabilities.

macro_rules! unsupported {
  ($name:expr) => {{
    ::tracing::error!("Unsupported method {} called", $name);
    return Err(::tonic::Status::new(
      ::tonic::Code::Unimplemented,
      format!("Unsupported method {} called", $name),
    ));
  }};
}

pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod node;

pub use config::Config;
pub use controller::Controller;
pub use error::Error;
pub use identity::Identity;
pub use node::Node;

pub const PLUGIN_NAME: &str = "sharedlvm.csi.dev";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
