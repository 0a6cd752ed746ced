fn main() {
    println!("cargo::rustc-check-cfg=cfg(emulated)");

    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap();
    let forced = std::env::var_os("CARGO_FEATURE_SOFTWARE_EMULATION").is_some();

    // Only a bare-metal 32-bit x86 target drives real paging hardware.
    if forced || arch != "x86" || os != "none" {
        println!("cargo::rustc-cfg=emulated");
    }
}
