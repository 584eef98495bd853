/// Service version, as reported at startup
pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
