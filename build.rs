use std::process::Command;

fn main() {
    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    println!("cargo:rustc-env=USAGE_TRACKER_BUILD_TIME={}", timestamp);

    println!("cargo:rerun-if-changed=.git/HEAD");

    // Git hash is optional; source tarballs build without it
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=USAGE_TRACKER_GIT_HASH={}", git_hash);
}
