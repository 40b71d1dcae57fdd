use std::path::{Path, PathBuf};

use anyhow::Context;
use vidgrab_core::fs_paths::app_data_dir;

use crate::models::settings::AppSettings;

const CONFIG_ENV: &str = "VIDGRAB_CONFIG";
const SETTINGS_FILE: &str = "settings.json";

pub fn settings_path() -> PathBuf {
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => app_data_dir().join(SETTINGS_FILE),
    }
}

/// Settings file (if any) plus environment overrides.
pub fn load_settings() -> anyhow::Result<AppSettings> {
    let path = settings_path();
    let mut settings = load_from(&path)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// A missing file yields the defaults; a malformed one is an error.
pub fn load_from(path: &Path) -> anyhow::Result<AppSettings> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AppSettings::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn apply_env_overrides(
    settings: &mut AppSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = lookup("PORT") {
        settings.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("PORT must be a port number, got {:?}", port))?;
    }
    if let Some(bind) = lookup("VIDGRAB_BIND") {
        settings.server.bind = bind.trim().to_string();
    }
    if let Some(dir) = lookup("DOWNLOAD_DIR") {
        settings.download.work_dir = PathBuf::from(dir);
    }
    if let Some(max) = lookup("MAX_CONCURRENT_DOWNLOADS") {
        settings.download.max_concurrent_downloads = max
            .trim()
            .parse()
            .with_context(|| format!("MAX_CONCURRENT_DOWNLOADS must be a number, got {:?}", max))?;
    }
    Ok(())
}
