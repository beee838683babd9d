use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// HugoConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HugoConfig {
    /// Executable name or path used for both the version check and `serve`.
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_binary() -> String {
    "hugo".to_string()
}

impl Default for HugoConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
        }
    }
}

// ---------------------------------------------------------------------------
// PreviewSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSettings {
    #[serde(default = "default_ready_delay_ms")]
    pub ready_delay_ms: u64,
    #[serde(default)]
    pub open_browser: bool,
}

fn default_ready_delay_ms() -> u64 {
    2000
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            ready_delay_ms: default_ready_delay_ms(),
            open_browser: false,
        }
    }
}

impl PreviewSettings {
    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub hugo: HugoConfig,
    #[serde(default)]
    pub preview: PreviewSettings,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            hugo: HugoConfig::default(),
            preview: PreviewSettings::default(),
        }
    }
}

impl Config {
    /// Load `.dearblog.yaml` from `root`. A missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.hugo.binary.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "hugo.binary is empty".to_string(),
            });
        }

        if self.preview.ready_delay_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "preview.ready_delay_ms is 0: the ready hint will fire \
                          before hugo has built the site"
                    .to_string(),
            });
        } else if self.preview.ready_delay_ms > 60_000 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "preview.ready_delay_ms={} (>60s is unusual)",
                    self.preview.ready_delay_ms
                ),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.hugo.binary, "hugo");
        assert_eq!(cfg.preview.ready_delay(), Duration::from_millis(2000));
        assert!(!cfg.preview.open_browser);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "preview:\n  open_browser: true\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.hugo.binary, "hugo");
        assert_eq!(cfg.preview.ready_delay_ms, 2000);
        assert!(cfg.preview.open_browser);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.hugo.binary = "/opt/hugo/bin/hugo".to_string();
        cfg.preview.ready_delay_ms = 500;
        cfg.save(dir.path()).unwrap();

        assert!(dir.path().join(".dearblog.yaml").exists());
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.hugo.binary, "/opt/hugo/bin/hugo");
        assert_eq!(loaded.preview.ready_delay_ms, 500);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".dearblog.yaml"), "preview: [oops").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_empty_binary_and_odd_delays() {
        let mut cfg = Config::default();
        cfg.hugo.binary = "  ".to_string();
        cfg.preview.ready_delay_ms = 0;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].level, WarnLevel::Error);
        assert_eq!(warnings[1].level, WarnLevel::Warning);

        cfg.hugo.binary = "hugo".to_string();
        cfg.preview.ready_delay_ms = 120_000;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains(">60s"));
    }
}
