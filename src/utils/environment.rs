use std::path::PathBuf;

const APP_DIR: &str = "chat-playlist-explorer";

/// `<config_dir>/chat-playlist-explorer/config.toml`, when the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}
