//! Configuration file support for hydrocam.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (HYDROCAM_*)
//! 3. Local config file (./hydrocam.toml)
//! 4. Global config file (~/.config/hydrocam/config.toml)

use directories::ProjectDirs;
use hydrocam::TransferConfig;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "hydrocam.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate override.
    pub baud: Option<u32>,
}

/// Image transfer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSection {
    /// Bytes per `get_image` request.
    pub chunk_size: Option<usize>,
    /// Global transfer deadline in seconds.
    pub timeout_secs: Option<u64>,
    /// Directory for downloaded images.
    pub output_dir: Option<PathBuf>,
}

impl TransferSection {
    /// Library transfer settings with these overrides applied.
    pub fn to_transfer_config(&self) -> TransferConfig {
        let mut config = TransferConfig::default();
        if let Some(chunk_size) = self.chunk_size {
            config = config.with_chunk_size(chunk_size);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_global_timeout(Duration::from_secs(secs));
        }
        config
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hydrocam").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set fields win.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.transfer.chunk_size.is_some() {
            self.transfer.chunk_size = other.transfer.chunk_size;
        }
        if other.transfer.timeout_secs.is_some() {
            self.transfer.timeout_secs = other.transfer.timeout_secs;
        }
        if other.transfer.output_dir.is_some() {
            self.transfer.output_dir = other.transfer.output_dir;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.transfer.chunk_size.is_none());
        assert!(config.transfer.output_dir.is_none());
    }

    #[test]
    fn test_config_merge_overrides_set_fields() {
        let mut base = Config::default();
        base.connection.baud = Some(57_600);
        base.transfer.chunk_size = Some(4096);

        let mut other = Config::default();
        other.connection.serial = Some("/dev/ttyUSB0".to_string());
        other.transfer.chunk_size = Some(8192);

        base.merge(other);

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.connection.baud, Some(57_600));
        assert_eq!(base.transfer.chunk_size, Some(8192));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.transfer.timeout_secs = Some(60);

        base.merge(Config::default());

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.transfer.timeout_secs, Some(60));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyUSB0"
baud = 115200

[transfer]
chunk_size = 8192
timeout_secs = 60
output_dir = "images"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115_200));
        assert_eq!(config.transfer.chunk_size, Some(8192));
        assert_eq!(config.transfer.timeout_secs, Some(60));
        assert_eq!(config.transfer.output_dir, Some(PathBuf::from("images")));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.transfer.chunk_size.is_none());
    }

    #[test]
    fn test_transfer_section_applies_overrides() {
        let section = TransferSection {
            chunk_size: Some(2048),
            timeout_secs: Some(30),
            output_dir: None,
        };
        let config = section.to_transfer_config();
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.global_timeout, Duration::from_secs(30));

        let defaults = TransferSection::default().to_transfer_config();
        assert_eq!(defaults.chunk_size, 16384);
        assert_eq!(defaults.global_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("hydrocam.toml");
        fs::write(
            &path,
            r#"
[connection]
serial = "/dev/ttyUSB1"
[transfer]
chunk_size = 1024
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.transfer.chunk_size, Some(1024));
    }

    #[test]
    fn test_load_from_path_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("broken.toml");
        fs::write(&path, "[connection\nserial = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path_names_the_tool() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("hydrocam"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
