use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::pins::PinTable;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    /// Seconds a client may take to send its request head.
    pub timeout: u64,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Kernel interface used to reach the pins. Chosen once at startup.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BackendConfig {
    Sysfs {
        #[serde(default = "default_sysfs_root")]
        root: String,
    },
    Cdev {
        #[serde(default = "default_chip")]
        chip: String,
    },
    Mock,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Cdev {
            chip: default_chip(),
        }
    }
}

fn default_sysfs_root() -> String {
    crate::backend::sysfs::SYSFS_GPIO_ROOT.to_string()
}

fn default_chip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_broadcast_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default)]
    pub pin_table: PinTable,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        if config.poll_interval_ms == 0 {
            return Err(AppError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg = AppConfig::from_json(
            r#"{
                "http": { "host": "localhost:8080", "path": "/api/v1", "timeout": 30 },
                "backend": { "kind": "mock" },
                "poll_interval_ms": 250
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.backend, BackendConfig::Mock);
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.broadcast_capacity, 64);
        assert_eq!(cfg.pin_table.len(), 6);
        assert_eq!(cfg.http.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn backend_defaults_to_cdev() {
        let cfg = AppConfig::from_json(r#"{ "http": { "path": "/", "timeout": 1 } }"#).unwrap();
        assert_eq!(
            cfg.backend,
            BackendConfig::Cdev {
                chip: "/dev/gpiochip0".into()
            }
        );
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let parsed = AppConfig::from_json(
            r#"{ "http": { "path": "/", "timeout": 1 }, "poll_interval_ms": 0 }"#,
        );
        assert!(matches!(parsed, Err(AppError::Config(_))));
    }
}
