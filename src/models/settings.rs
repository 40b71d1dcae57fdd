use serde::{Deserialize, Serialize};
use vidgrab_core::models::settings::OrchestratorSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub schema_version: u32,
    pub server: ServerSettings,
    pub download: OrchestratorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    /// Per-client limit on `/api/info`; 0 turns it off.
    pub info_requests_per_minute: u32,
    /// Per-client limit on `/api/download`; 0 turns it off.
    pub download_requests_per_minute: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            server: ServerSettings::default(),
            download: OrchestratorSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5000,
            info_requests_per_minute: 30,
            download_requests_per_minute: 10,
        }
    }
}
