fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/bootz.proto");

    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("bootz_descriptor.bin"))
        .compile_protos(&["proto/bootz.proto"], &["proto"])?;

    Ok(())
}
