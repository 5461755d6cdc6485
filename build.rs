use std::{env, path::PathBuf};

fn link_script(bin: &str, script: &str) {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_default();
    let path = PathBuf::from(manifest_dir).join(bin).join(script);
    println!("cargo:rerun-if-changed={}", path.display());

    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        println!("cargo:rustc-link-arg-bin={}=-T{}", bin, path.display());
    }
}

fn main() {
    link_script("kernelloader", "kernelloader.ld");
    link_script("kernel", "kernel.ld");
}
