//! Default locations for `config.yaml` and `keys.json`.
//!
//! ## Lookup order
//!
//! - **Working directory**: if `config.yaml` exists in the current directory
//!   (typical on a Pi where the service runs from its checkout), both files
//!   are read from there.
//! - **User config directory** (default): `~/.config/hashtag-lights/` or the
//!   platform equivalent from `dirs::config_dir()`.
//!
//! Command line flags override either path.

use std::path::{Path, PathBuf};

/// Directory name under the user config directory
const APP_NAME: &str = "hashtag-lights";

const CONFIG_FILE: &str = "config.yaml";
const CREDENTIALS_FILE: &str = "keys.json";

/// Resolved file locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the provider key file
    pub credentials: PathBuf,
    /// Whether the files come from the working directory
    pub is_local: bool,
}

impl AppPaths {
    /// Detect the default paths from the environment.
    ///
    /// Called before logging is initialized, so debug builds report through
    /// eprintln.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve(&cwd, dirs::config_dir())
    }

    /// Same as [`AppPaths::detect`] with explicit inputs
    pub fn resolve(cwd: &Path, config_dir: Option<PathBuf>) -> Self {
        if cwd.join(CONFIG_FILE).exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Using working directory {}", cwd.display());
            return Self::in_dir(cwd, true);
        }

        let base = config_dir
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no user config directory, falling back to cwd");
                cwd.to_path_buf()
            })
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!("[paths] Using config directory {}", base.display());
        Self::in_dir(&base, false)
    }

    fn in_dir(dir: &Path, is_local: bool) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            credentials: dir.join(CREDENTIALS_FILE),
            is_local,
        }
    }

    /// Apply command line overrides
    pub fn with_overrides(mut self, config: Option<PathBuf>, credentials: Option<PathBuf>) -> Self {
        if let Some(config) = config {
            self.config = config;
        }
        if let Some(credentials) = credentials {
            self.credentials = credentials;
        }
        self
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_working_directory_wins_when_config_present() {
        let cwd = TempDir::new().unwrap();
        std::fs::write(cwd.path().join("config.yaml"), "").unwrap();

        let paths = AppPaths::resolve(cwd.path(), Some(PathBuf::from("/home/pi/.config")));
        assert!(paths.is_local);
        assert_eq!(paths.config, cwd.path().join("config.yaml"));
        assert_eq!(paths.credentials, cwd.path().join("keys.json"));
    }

    #[test]
    fn test_falls_back_to_user_config_dir() {
        let cwd = TempDir::new().unwrap();
        let paths = AppPaths::resolve(cwd.path(), Some(PathBuf::from("/home/pi/.config")));

        assert!(!paths.is_local);
        assert_eq!(
            paths.config,
            PathBuf::from("/home/pi/.config/hashtag-lights/config.yaml")
        );
        assert_eq!(
            paths.base_dir(),
            PathBuf::from("/home/pi/.config/hashtag-lights")
        );
    }

    #[test]
    fn test_overrides() {
        let cwd = TempDir::new().unwrap();
        let paths = AppPaths::resolve(cwd.path(), None)
            .with_overrides(None, Some(PathBuf::from("/etc/lights/keys.json")));

        assert_eq!(paths.config, cwd.path().join("hashtag-lights/config.yaml"));
        assert_eq!(paths.credentials, PathBuf::from("/etc/lights/keys.json"));
    }
}
