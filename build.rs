/// Build script for DXLearn
///
/// The config file is read at startup, so a change to the default one should
/// not force a rebuild of anything but the binary metadata.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");
}
