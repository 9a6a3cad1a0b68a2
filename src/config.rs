use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::layout_store::write_atomic;
use crate::shortcuts::{Host, KeyProfile, Os};

/// Environment override for the config directory (tests, portable installs).
pub const CONFIG_DIR_ENV_VAR: &str = "CHATDECK_CONFIG_DIR";

pub const CONFIG_FILE: &str = "chatdeck.json";

/// Backing file for `JsonFileStore`-persisted tab layouts.
pub const TAB_LAYOUT_FILE: &str = "tab-layouts.json";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/chatdeck/`
/// - Linux: `~/.config/chatdeck/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/chatdeck/`
///
/// `CHATDECK_CONFIG_DIR` wins when set and non-empty. Falls back to
/// `~/.chatdeck/` if the platform dir is unavailable.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV_VAR).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|d| d.join("chatdeck"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chatdeck")
        })
}

/// Load a JSON file from `dir`, returning Default if missing or corrupt.
/// Logs when the file exists but cannot be read or parsed, so a corrupt file
/// is visible instead of silently resetting state.
pub(crate) fn load_json_from<T: DeserializeOwned + Default>(dir: &Path, filename: &str) -> T {
    let path = dir.join(filename);
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), "could not read config: {e}");
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %path.display(), "corrupt config, using defaults: {e}");
            T::default()
        }
    }
}

pub(crate) fn load_json_config<T: DeserializeOwned + Default>(filename: &str) -> T {
    load_json_from(&config_dir(), filename)
}

/// Save a JSON config file atomically (temp file + rename), 0600 on unix.
pub(crate) fn save_json_config<T: Serialize>(filename: &str, config: &T) -> Result<(), String> {
    write_atomic(&config_dir().join(filename), config)
}

// ---------------------------------------------------------------------------
// CoordinatorConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How long closed tabs and archived workspaces stay undoable
    #[serde(default = "default_undo_window_ms")]
    pub undo_window_ms: u64,
    /// Native shell or generic browser; picks the shortcut table
    #[serde(default)]
    pub host: Host,
    #[serde(default)]
    pub os: Os,
    /// Namespace for persisted layouts, one per window/session
    #[serde(default = "default_window_prefix")]
    pub window_prefix: String,
    /// Write tab layout changes to the key-value store
    #[serde(default = "default_true")]
    pub persist_tab_layout: bool,
    /// Used when `CHATDECK_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_undo_window_ms() -> u64 {
    10_000
}

fn default_window_prefix() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "chatdeck_lib=info".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            undo_window_ms: default_undo_window_ms(),
            host: Host::default(),
            os: Os::default(),
            window_prefix: default_window_prefix(),
            persist_tab_layout: true,
            log_filter: default_log_filter(),
        }
    }
}

impl CoordinatorConfig {
    pub fn load() -> Self {
        load_json_config(CONFIG_FILE)
    }

    pub fn save(&self) -> Result<(), String> {
        save_json_config(CONFIG_FILE, self)
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    pub fn key_profile(&self) -> KeyProfile {
        KeyProfile::new(self.host, self.os)
    }

    pub fn tab_layout_path(&self) -> PathBuf {
        config_dir().join(TAB_LAYOUT_FILE)
    }
}
