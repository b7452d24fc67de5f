use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc unless one is provided explicitly
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("currency_descriptor.bin"))
        .compile(
            &["../../proto/currency.proto"],
            &["../../proto"],
        )?;

    println!("cargo:rerun-if-changed=../../proto/currency.proto");
    Ok(())
}
