use std::time::Duration;

use tokio::process::Child;

use crate::fs_paths::managed_bin_dir;

fn enhanced_path() -> String {
    let bin_dir = managed_bin_dir();
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    format!("{}{}{}", bin_dir.display(), sep, current)
}

/// Builds a command for an external tool. The child is killed if the
/// handle is dropped, so an abandoned pipeline never leaks a process.
pub fn command<S: AsRef<std::ffi::OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    cmd.env("PATH", enhanced_path());
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.kill_on_drop(true);
    cmd
}

/// Kills `child` and waits until it has been reaped.
pub async fn terminate(child: &mut Child, name: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill {} (pid {:?}): {}", name, child.id(), e);
        return;
    }
    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(_) => tracing::debug!("{} terminated", name),
        Err(_) => tracing::warn!("{} did not exit after kill", name),
    }
}
