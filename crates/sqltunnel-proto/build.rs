//! Build script for sqltunnel-proto
//!
//! Compiles protobuf definitions using tonic-prost-build, with the `protoc`
//! binary shipped by protoc-bin-vendored.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "../../proto".to_string();

    let protos = ["sqltunnel/v1/tunnel.proto"];

    let proto_paths: Vec<_> = protos
        .iter()
        .map(|p| format!("{proto_root}/{p}"))
        .collect();

    let mut config = tonic_prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_with_config(config, &proto_paths, &[proto_root])?;

    Ok(())
}
