//! CLI configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub hotplug: HotplugSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotplugSettings {
    /// Minimum time between two bus scans
    #[serde(default = "HotplugSettings::default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for HotplugSettings {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
        }
    }
}

impl HotplugSettings {
    fn default_interval_ms() -> u64 {
        usbkit::DEFAULT_RESCAN_INTERVAL.as_millis() as u64
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Bulk read buffer size in bytes
    #[serde(default = "TransferSettings::default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "TransferSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            buffer_size: Self::default_buffer_size(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl TransferSettings {
    fn default_buffer_size() -> usize {
        usbkit::DEFAULT_BUFFER_SIZE
    }

    fn default_timeout_ms() -> u64 {
        usbkit::DEFAULT_TIMEOUT.as_millis() as u64
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CliConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-hotplug/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from the standard locations, or defaults
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
            config_dir.join("usb-hotplug").join("config.toml")
        } else {
            PathBuf::from(".config/usb-hotplug/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.hotplug.interval_ms == 0 {
            return Err(anyhow!("hotplug.interval_ms must be greater than 0"));
        }

        if self.transfer.buffer_size == 0 {
            return Err(anyhow!("transfer.buffer_size must be greater than 0"));
        }

        if self.transfer.timeout_ms == 0 {
            return Err(anyhow!("transfer.timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}

/// Parse a vendor or product id: `0x1209`, `1209` (hex) or `#4617` (decimal)
pub fn parse_usb_id(s: &str) -> Result<u16> {
    let s = s.trim();
    if let Some(decimal) = s.strip_prefix('#') {
        return decimal
            .parse()
            .map_err(|_| anyhow!("Invalid decimal USB id '{}'", s));
    }

    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if hex.is_empty() || hex.len() > 4 {
        return Err(anyhow!("Invalid USB id '{}', hex part must be 1-4 digits", s));
    }

    u16::from_str_radix(hex, 16).map_err(|_| anyhow!("Invalid USB id '{}', not a valid hex number", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.hotplug.interval_ms, 1000);
        assert_eq!(config.transfer.buffer_size, 8192);
        assert_eq!(config.transfer.timeout_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
[hotplug]
interval_ms = 250
"#,
        )
        .unwrap();

        assert_eq!(config.hotplug.interval(), Duration::from_millis(250));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.transfer.timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CliConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.hotplug.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.transfer.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.transfer.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        config.logging.level = "debug".to_string();
        config.transfer.buffer_size = 64;
        config.save(&path).unwrap();

        let loaded = CliConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.logging.level, "debug");
        assert_eq!(loaded.transfer.buffer_size, 64);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"loud\"").unwrap();

        assert!(CliConfig::load(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_parse_usb_id() {
        assert_eq!(parse_usb_id("0x1209").unwrap(), 0x1209);
        assert_eq!(parse_usb_id("0X0d32").unwrap(), 0x0D32);
        assert_eq!(parse_usb_id("2c24").unwrap(), 0x2C24);
        assert_eq!(parse_usb_id("#4617").unwrap(), 4617);
        assert!(parse_usb_id("0x").is_err());
        assert!(parse_usb_id("0x12345").is_err());
        assert!(parse_usb_id("zzzz").is_err());
    }
}
