use lvm_utils::LvmCommands;
use mount_utils::OsMounter;
use sharedlvm::{Config, Controller, Identity, Node};
use sharedlvm_proto::{ControllerServer, IdentityServer, NodeServer};
use std::{fs, io, sync::Arc};
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Config::from_args();

  // A previous instance may have left its socket behind.
  match fs::remove_file(&config.endpoint) {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(e.into()),
  }

  let listener = UnixListener::bind(&config.endpoint)?;
  info!(
    "{} v{} listening on {}",
    sharedlvm::PLUGIN_NAME,
    sharedlvm::PLUGIN_VERSION,
    config.endpoint.display()
  );

  let lvm = Arc::new(LvmCommands::new());
  let mounter = Arc::new(OsMounter::new());

  Server::builder()
    .add_service(IdentityServer::new(Identity::default()))
    .add_service(ControllerServer::new(Controller::new(lvm.clone())))
    .add_service(NodeServer::new(Node::new(config.node_id, lvm, mounter)))
    .serve_with_incoming(UnixListenerStream::new(listener))
    .await?;

  Ok(())
}
