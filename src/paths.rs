use std::path::PathBuf;

pub const CONFIG_FILE_NAME: &str = "dms.conf";
pub const SEND_LOG_FILE_NAME: &str = "send-log.md";

pub fn default_config_dir() -> PathBuf {
    let path = config_base_dir().join("discord-message-shortcut");
    let _ = std::fs::create_dir_all(&path);
    path
}

#[cfg(target_os = "windows")]
fn config_base_dir() -> PathBuf {
    match std::env::var_os("APPDATA") {
        Some(appdata) => PathBuf::from(appdata),
        None => PathBuf::from("."),
    }
}

#[cfg(target_os = "macos")]
fn config_base_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join("Library")
            .join("Application Support"),
        None => PathBuf::from("."),
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn config_base_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config"),
        None => PathBuf::from("."),
    }
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE_NAME)
}

pub fn default_send_log_path() -> PathBuf {
    default_config_dir().join(SEND_LOG_FILE_NAME)
}
