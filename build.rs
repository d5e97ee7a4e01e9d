use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Only the firmware image needs the linker script; host builds of the
    // library and its tests don't.
    if env::var_os("CARGO_FEATURE_FIRMWARE").is_some() {
        let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
        fs::copy("memory.x", out_dir.join("memory.x")).unwrap();
        println!("cargo:rustc-link-search={}", out_dir.display());
    }
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}
