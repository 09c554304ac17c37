//! Driver configuration management

use crate::lifecycle::{DeviceFilter, DeviceTable};
use crate::usb::BindOptions;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub driver: DriverSettings,
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    pub log_level: String,
    /// Send a wake command to every bound headset this often in watch mode
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Device table as VID:PID patterns; empty means the built-in IDs
    #[serde(default = "UsbSettings::default_filters")]
    pub filters: Vec<String>,
    /// Interface claimed on the headset
    #[serde(default)]
    pub interface: u8,
    /// Detach a kernel driver bound to the interface before claiming it
    #[serde(default = "UsbSettings::default_detach_kernel_driver")]
    pub detach_kernel_driver: bool,
}

impl UsbSettings {
    fn default_filters() -> Vec<String> {
        vec!["0x1641:0x0120".to_string(), "0x1642:0x0120".to_string()]
    }

    fn default_detach_kernel_driver() -> bool {
        true
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver: DriverSettings {
                log_level: "info".to_string(),
                keepalive_secs: None,
            },
            usb: UsbSettings {
                filters: UsbSettings::default_filters(),
                interface: 0,
                detach_kernel_driver: UsbSettings::default_detach_kernel_driver(),
            },
        }
    }
}

impl DriverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/z800/driver.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("z800").join("driver.toml")
        } else {
            PathBuf::from(".config/z800/driver.toml")
        }
    }

    /// Keep-alive period, if enabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.driver.keepalive_secs.map(Duration::from_secs)
    }

    /// How headsets are claimed
    pub fn bind_options(&self) -> BindOptions {
        BindOptions {
            interface: self.usb.interface,
            detach_kernel_driver: self.usb.detach_kernel_driver,
        }
    }

    /// Build the device table from the configured filters
    pub fn device_table(&self) -> Result<DeviceTable> {
        let filters = self
            .usb
            .filters
            .iter()
            .map(|filter| filter.parse::<DeviceFilter>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(DeviceTable::new(filters))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.driver.keepalive_secs == Some(0) {
            return Err(anyhow!("keepalive_secs must be greater than 0"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        filter
            .parse::<DeviceFilter>()
            .map(|_| ())
            .map_err(|e| anyhow!(e))
    }
}

/// Load a configuration file, expanding a leading `~`
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::UsbId;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.driver.log_level, "info");
        assert_eq!(config.driver.keepalive_secs, None);
        assert_eq!(config.usb.interface, 0);
        assert!(config.usb.detach_kernel_driver);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(DriverConfig::validate_filter("0x1641:0x0120").is_ok());
        assert!(DriverConfig::validate_filter("0x1641:*").is_ok());
        assert!(DriverConfig::validate_filter("*:0x0120").is_ok());
        assert!(DriverConfig::validate_filter("*:*").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(DriverConfig::validate_filter("1641:0120").is_err());
        assert!(DriverConfig::validate_filter("0x1641").is_err());
        assert!(DriverConfig::validate_filter("0xGHIJ:0x0120").is_err());
        assert!(DriverConfig::validate_filter("0x16410:0x0120").is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = DriverConfig::default();
        config.driver.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.driver.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_keepalive_rejected() {
        let mut config = DriverConfig::default();
        config.driver.keepalive_secs = Some(0);
        assert!(config.validate().is_err());

        config.driver.keepalive_secs = Some(30);
        assert!(config.validate().is_ok());
        assert_eq!(config.keepalive_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_device_table_from_filters() {
        let mut config = DriverConfig::default();
        let table = config.device_table().unwrap();
        assert!(table.recognizes(UsbId::new(0x1641, 0x0120)));
        assert!(table.recognizes(UsbId::new(0x1642, 0x0120)));
        assert!(!table.recognizes(UsbId::new(0x1641, 0x0121)));

        config.usb.filters = vec!["0x1641:*".to_string()];
        let table = config.device_table().unwrap();
        assert!(table.recognizes(UsbId::new(0x1641, 0x0121)));
        assert!(!table.recognizes(UsbId::new(0x1642, 0x0120)));
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: DriverConfig = toml::from_str(
            r#"
            [driver]
            log_level = "warn"

            [usb]
            "#,
        )
        .unwrap();

        assert_eq!(config.driver.log_level, "warn");
        assert_eq!(config.usb.filters.len(), 2);
        assert!(config.usb.detach_kernel_driver);
    }
}
