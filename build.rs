fn main() {
    // Release builds set TERMTABS_VERSION explicitly; local builds fall back to the git hash.
    if let Ok(version) = std::env::var("TERMTABS_VERSION") {
        println!("cargo:rustc-env=TERMTABS_VERSION={version}");
        return;
    }

    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_default()
        .trim()
        .to_string();

    let version = if hash.is_empty() {
        format!("{}-dev", std::env::var("CARGO_PKG_VERSION").unwrap_or_default())
    } else {
        format!(
            "{}-{hash}",
            std::env::var("CARGO_PKG_VERSION").unwrap_or_default()
        )
    };
    println!("cargo:rustc-env=TERMTABS_VERSION={version}");
    println!("cargo:rerun-if-env-changed=TERMTABS_VERSION");
}
