use std::env;

fn main() {
    // Release builds export TEMPS_VERSION; local builds use the package
    // version tagged with the build date
    let version = env::var("TEMPS_VERSION").unwrap_or_else(|_| {
        format!(
            "{}+{}",
            env::var("CARGO_PKG_VERSION").unwrap_or_default(),
            chrono::Utc::now().format("%Y%m%d")
        )
    });

    println!("cargo:rustc-env=TEMPS_VERSION={}", version);
    println!("cargo:rerun-if-env-changed=TEMPS_VERSION");
}
