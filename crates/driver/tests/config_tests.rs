//! Integration tests for configuration files
//!
//! Run with: `cargo test -p driver --test config_tests`

use driver::DriverConfig;
use driver::config::load_config;
use protocol::UsbId;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[driver]
log_level = "debug"
keepalive_secs = 45

[usb]
filters = ["0x1641:*"]
interface = 1
detach_kernel_driver = false
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("driver.toml");
    fs::write(&path, content).unwrap();
    path
}

mod loading {
    use super::*;

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, FULL_CONFIG);

        let config = DriverConfig::load(Some(path)).unwrap();
        assert_eq!(config.driver.log_level, "debug");
        assert_eq!(config.keepalive_interval(), Some(Duration::from_secs(45)));
        assert_eq!(config.usb.filters, vec!["0x1641:*".to_string()]);

        let options = config.bind_options();
        assert_eq!(options.interface, 1);
        assert!(!options.detach_kernel_driver);

        let table = config.device_table().unwrap();
        assert!(table.recognizes(UsbId::new(0x1641, 0x0999)));
        assert!(!table.recognizes(UsbId::new(0x1642, 0x0120)));
    }

    #[test]
    fn test_load_via_path_string() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, FULL_CONFIG);

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.usb.interface, 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(DriverConfig::load(Some(dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("driver.toml");

        let mut config = DriverConfig::default();
        config.driver.keepalive_secs = Some(10);
        config.save(&path).unwrap();

        let loaded = DriverConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.driver.keepalive_secs, Some(10));
        assert_eq!(loaded.usb.filters, config.usb.filters);
        assert!(loaded.usb.detach_kernel_driver);
    }
}

mod validation {
    use super::*;

    #[test]
    fn test_invalid_log_level_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[driver]
log_level = "chatty"

[usb]
"#,
        );

        let err = DriverConfig::load(Some(path)).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[driver]
log_level = "info"

[usb]
filters = ["1641:0120"]
"#,
        );

        assert!(DriverConfig::load(Some(path)).is_err());
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[driver\nlog_level = ");

        let err = DriverConfig::load(Some(path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_empty_filter_list_uses_builtin_ids() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[driver]
log_level = "info"

[usb]
filters = []
"#,
        );

        let table = DriverConfig::load(Some(path)).unwrap().device_table().unwrap();
        assert!(table.recognizes(UsbId::new(0x1641, 0x0120)));
        assert!(table.recognizes(UsbId::new(0x1642, 0x0120)));
    }
}
