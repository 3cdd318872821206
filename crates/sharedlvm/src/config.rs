use clap::{App, Arg};
use std::path::PathBuf;

const DEFAULT_ENDPOINT: &str = "/csi/csi.sock";

/// Runtime configuration, resolved from the command line.
#[derive(Clone, Debug)]
pub struct Config {
  /// Path of the unix socket the CSI services listen on.
  pub endpoint: PathBuf,
  /// Identifier reported by `NodeGetInfo`; must be unique per host.
  pub node_id: String,
}

impl Config {
  pub fn from_args() -> Self {
    let matches = App::new("sharedlvm-csi")
      .version(crate::PLUGIN_VERSION)
      .about("CSI plugin exposing shared LVM volume groups")
      .arg(
        Arg::with_name("endpoint")
          .short("e")
          .long("endpoint")
          .value_name("PATH")
          .help("CSI gRPC listen socket (default /csi/csi.sock)")
          .takes_value(true),
      )
      .arg(
        Arg::with_name("node-id")
          .short("n")
          .long("node-id")
          .value_name("NAME")
          .help("Unique node name where this instance runs")
          .required(true)
          .takes_value(true),
      )
      .get_matches();

    Config {
      endpoint: matches.value_of("endpoint").unwrap_or(DEFAULT_ENDPOINT).into(),
      node_id: matches.value_of("node-id").unwrap().to_owned(),
    }
  }
}
