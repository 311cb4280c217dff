//! Platform detection and where Tether keeps its files.

use std::path::PathBuf;
use crate::error::{TetherError, TetherResult};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Directory name under the per-user base directories.
    ///
    /// Linux follows the XDG habit of lowercase names.
    pub fn app_dir_name(&self) -> &'static str {
        match self {
            Platform::Linux => "tether",
            Platform::Windows | Platform::MacOs => crate::constants::APP_NAME,
        }
    }

    /// Default location of `config.toml`.
    ///
    /// - Windows: `%APPDATA%\Tether\config.toml`
    /// - macOS: `~/Library/Application Support/Tether/config.toml`
    /// - Linux: `~/.config/tether/config.toml`
    pub fn config_file() -> TetherResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| TetherError::Config("could not determine config directory".into()))?;
        Ok(base
            .join(Self::current().app_dir_name())
            .join(crate::constants::CONFIG_FILE_NAME))
    }

    /// Default directory for the rolling log files.
    ///
    /// - Windows: `%APPDATA%\Tether\logs`
    /// - macOS: `~/Library/Application Support/Tether/logs`
    /// - Linux: `~/.local/share/tether/logs`
    pub fn log_dir() -> TetherResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| TetherError::Config("could not determine data directory".into()))?;
        Ok(base.join(Self::current().app_dir_name()).join("logs"))
    }

    /// Human-readable platform name.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name() {
        assert_eq!(Platform::Windows.name(), "Windows");
        assert_eq!(Platform::MacOs.name(), "macOS");
        assert_eq!(Platform::Linux.to_string(), "Linux");
    }

    #[test]
    fn test_app_dir_name() {
        assert_eq!(Platform::Linux.app_dir_name(), "tether");
        assert_eq!(Platform::MacOs.app_dir_name(), "Tether");
    }

    #[test]
    fn test_default_paths() {
        if let Ok(path) = Platform::config_file() {
            assert!(path.ends_with("config.toml"));
        }
        if let Ok(dir) = Platform::log_dir() {
            assert!(dir.ends_with("logs"));
        }
    }
}
