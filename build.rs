use std::env;

fn main() {
    // Allow packaging pipelines to stamp their own version string
    let version = env::var("FLAVOR_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=FLAVOR_VERSION={}", version);
    println!("cargo:rerun-if-env-changed=FLAVOR_VERSION");
}
