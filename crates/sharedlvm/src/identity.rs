use crate::{PLUGIN_NAME, PLUGIN_VERSION};
use sharedlvm_proto::csi;
use tonic::{Request, Response, Status};
use tracing::debug;

/// CSI identity service: plugin discovery and readiness.
#[derive(Debug, Default)]
pub struct Identity;

#[tonic::async_trait]
impl csi::identity_server::Identity for Identity {
  /// GetPluginInfo returns the version and name of this service.
  async fn get_plugin_info(
    &self,
    _request: Request<csi::GetPluginInfoRequest>,
  ) -> Result<Response<csi::GetPluginInfoResponse>, Status> {
    let response = csi::GetPluginInfoResponse {
      name: PLUGIN_NAME.into(),
      vendor_version: PLUGIN_VERSION.into(),
      manifest: Default::default(),
    };

    debug!("GetPluginInfo: {:?}", response);

    Ok(Response::new(response))
  }

  /// GetPluginCapabilities reports whether this plugin can serve the
  /// Controller interface. Controller RPCs are only invoked by the
  /// orchestrator when this capability is present.
  async fn get_plugin_capabilities(
    &self,
    _request: Request<csi::GetPluginCapabilitiesRequest>,
  ) -> Result<Response<csi::GetPluginCapabilitiesResponse>, Status> {
    let response = csi::GetPluginCapabilitiesResponse {
      capabilities: vec![csi::PluginCapability {
        r#type: Some(csi::plugin_capability::Type::Service(
          csi::plugin_capability::Service {
            r#type: csi::plugin_capability::service::Type::ControllerService as i32,
          },
        )),
      }],
    };

    debug!("GetPluginCapabilities: {:?}", response);

    Ok(Response::new(response))
  }

  /// Probe checks if the plugin is running or not.
  async fn probe(
    &self,
    _request: Request<csi::ProbeRequest>,
  ) -> Result<Response<csi::ProbeResponse>, Status> {
    Ok(Response::new(csi::ProbeResponse { ready: Some(true) }))
  }
}
