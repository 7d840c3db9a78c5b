//! Build script for metering-agent-native.
//!
//! Records the build time as `BUILD_TIMESTAMP` and generates `metering_agent_native.h`, the C
//! header for the functions in `src/ffi/mod.rs`, in the crate root.

use std::env;

fn main() {
    // CARGO_MANIFEST_DIR is always set by Cargo for build scripts.
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();

    let now = chrono::Utc::now();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", now.to_rfc3339());

    let config = cbindgen::Config::from_root_or_default(&crate_dir);
    cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
        .expect("Unable to generate C bindings")
        .write_to_file("metering_agent_native.h");

    println!("cargo:rerun-if-changed=src/ffi/mod.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");
}
