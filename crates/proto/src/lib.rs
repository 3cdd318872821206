//! Server-side bindings for the CSI v1 gRPC contract.
//!
//! The wire protocol is a consumed contract: `proto/csi.proto` at the
//! workspace root is compiled by `tonic-build` and re-exported here
//! unchanged. Everything the plugin knows about volumes, capabilities
//! and capacity ranges comes out of this module.

#[allow(clippy::large_enum_variant)]
#[allow(clippy::module_inception)]
pub mod csi {
  tonic::include_proto!("csi.v1");
}

pub use csi::{
  controller_server::ControllerServer, identity_server::IdentityServer, node_server::NodeServer,
};
