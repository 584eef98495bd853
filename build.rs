fn main() {
    // Enable pkg-config for cross-compilation (needed for pcsc-sys when
    // building the service for musl or ARM reader hosts)
    std::env::set_var("PKG_CONFIG_ALLOW_CROSS", "1");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");
}
