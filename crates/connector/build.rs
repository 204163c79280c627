//! Compiles the bundled MALOS driver schema into a binary descriptor set so
//! the runtime never needs the `.proto` text.

use std::path::PathBuf;

use prost::Message;

const BUNDLED_PROTO: &str = "proto/malos/driver.proto";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed={BUNDLED_PROTO}");

    let descriptor_set = protox::compile([BUNDLED_PROTO], ["proto"])?;
    let out = PathBuf::from(std::env::var("OUT_DIR")?).join("malos_driver.bin");
    std::fs::write(out, descriptor_set.encode_to_vec())?;
    Ok(())
}
