use std::path::PathBuf;
use std::process::Stdio;

use serde::Serialize;

use crate::core::process;
use crate::fs_paths::managed_bin_dir;

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

fn bin_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

fn version_flag_for(tool: &str) -> &'static str {
    match tool {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    }
}

/// Looks for `tool` on `PATH`, then in the managed bin dir.
pub async fn find_tool(tool: &str) -> Option<PathBuf> {
    let started = std::time::Instant::now();
    let name = bin_name(tool);

    if let Ok(status) = process::command(&name)
        .arg(version_flag_for(tool))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if status.success() {
            tracing::debug!("find_tool({}) took {:?}", tool, started.elapsed());
            return Some(PathBuf::from(&name));
        }
    }

    let managed = managed_bin_dir().join(&name);
    tracing::debug!("find_tool({}) took {:?}", tool, started.elapsed());
    if managed.exists() {
        return Some(managed);
    }
    None
}

pub async fn check_tool(tool: &str) -> ToolStatus {
    let path = find_tool(tool).await;
    let version = match &path {
        Some(p) => read_version(tool, p).await,
        None => None,
    };
    ToolStatus {
        name: tool.to_string(),
        available: path.is_some(),
        version,
        path,
    }
}

async fn read_version(tool: &str, path: &std::path::Path) -> Option<String> {
    let output = process::command(path)
        .arg(version_flag_for(tool))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_version(tool, stdout.lines().next().unwrap_or(""))
}

/// `ffmpeg version 6.1.1-3ubuntu5 Copyright …` → `6.1.1-3ubuntu5`;
/// yt-dlp prints the bare version.
fn parse_version(tool: &str, first_line: &str) -> Option<String> {
    let line = first_line.trim();
    if line.is_empty() {
        return None;
    }
    let version = match tool {
        "ffmpeg" | "ffprobe" => line
            .strip_prefix(&format!("{} version ", tool))
            .and_then(|rest| rest.split_whitespace().next())?,
        _ => line,
    };
    Some(version.to_string())
}
