fn main() {
    let protoc_path =
        protoc_bin_vendored::protoc_bin_path().expect("failed to find bundled protoc");
    let include_path =
        protoc_bin_vendored::include_path().expect("failed to find bundled protobuf includes");
    std::env::set_var("PROTOC", protoc_path);

    println!("cargo:rerun-if-changed=proto/ext_proc.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/ext_proc.proto"], &[std::path::PathBuf::from("proto"), include_path])
        .expect("failed to compile ext_proc definitions");
}
