fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use bundled protoc so the build doesn't depend on a system install.
    // SAFETY: build-script process, no concurrent env access.
    unsafe {
        std::env::set_var("PROTOC", protobuf_src::protoc());
    }

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        // The service defines an RPC named `Connect`, which would otherwise
        // collide with tonic's generated `Client::connect` transport helper.
        .build_transport(false)
        .compile_protos(&["proto/navigator.proto"], &["proto/"])?;
    Ok(())
}
