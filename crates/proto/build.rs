fn main() {
  tonic_build::configure()
    .build_client(false)
    .build_server(true)
    .compile(&["../../proto/csi.proto"], &["../../proto"])
    .expect("csi protobuf compilation failed");
}
