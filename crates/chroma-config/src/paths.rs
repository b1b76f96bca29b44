//! Platform-specific configuration paths.
//!
//! - **User config**: `~/.config/chroma/` (Linux),
//!   `~/Library/Application Support/chroma/` (macOS),
//!   `%APPDATA%\chroma\` (Windows)

use std::path::PathBuf;

/// Application name used for directory paths.
const APP_NAME: &str = "chroma";

/// Returns the user-specific configuration directory.
///
/// Falls back to the current directory if the platform config directory
/// cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default path of the server configuration file.
pub fn default_config_path() -> PathBuf {
    user_config_dir().join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_ends_with_app_dir() {
        let path = default_config_path();
        assert!(path.ends_with("chroma/server.toml") || path.ends_with("chroma\\server.toml"));
    }
}
