//! Persistent daemon configuration at `~/.open-agents/config.json`.
//!
//! Holds the relay endpoint, the device identity obtained at pairing time,
//! and the state the web UI syncs down (env vars, CLI toggles, auto-approval
//! rules, storage selection).

use std::collections::HashMap;
use std::path::PathBuf;

use agent_bridge_error::BridgeError;
use serde::{Deserialize, Serialize};

use crate::rules::AutoApprovalRule;

pub const CONFIG_DIR_NAME: &str = ".open-agents";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub server_url: String,
    pub user_id: String,
    pub device_id: String,
    pub device_token: String,
    pub env_vars: HashMap<String, String>,
    pub cli_enabled: HashMap<String, bool>,
    pub permissions: HashMap<String, bool>,
    pub rules: Vec<AutoApprovalRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(CONFIG_DIR_NAME))
}

pub fn config_path(dir: &PathBuf) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

pub fn load(dir: &PathBuf) -> Result<BridgeConfig, BridgeError> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|err| BridgeError::Config {
        message: format!("cannot read {}: {err}", path.display()),
    })?;
    serde_json::from_str(&text).map_err(|err| BridgeError::Config {
        message: format!("cannot parse {}: {err}", path.display()),
    })
}

pub fn save(dir: &PathBuf, config: &BridgeConfig) -> Result<(), BridgeError> {
    std::fs::create_dir_all(dir).map_err(|err| BridgeError::Config {
        message: format!("cannot create {}: {err}", dir.display()),
    })?;
    let path = config_path(dir);
    let text = serde_json::to_string_pretty(config).map_err(|err| BridgeError::Config {
        message: format!("cannot encode config: {err}"),
    })?;
    std::fs::write(&path, text).map_err(|err| BridgeError::Config {
        message: format!("cannot write {}: {err}", path.display()),
    })
}
