use std::path::PathBuf;

/// Root for managed binaries and settings. `VIDGRAB_DATA_DIR` overrides it.
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VIDGRAB_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("vidgrab"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn managed_bin_dir() -> PathBuf {
    app_data_dir().join("bin")
}

/// Per-job directories are created below this one.
pub fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("vidgrab").join("jobs"))
        .unwrap_or_else(|| std::env::temp_dir().join("vidgrab").join("jobs"))
}
