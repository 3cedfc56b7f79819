//! Engine configuration.
//!
//! [`EngineConfig`] is the serde view of the `[gzip]`, `[request_id]`,
//! `[request]`, `[multipart]` and `[pool]` sections. Every field has a
//! default, so an empty document is a valid configuration. [`Settings`] is
//! the validated form the engine reads at request time; it never changes
//! after the engine is built.

use std::path::Path;

use http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Root configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gzip: GzipConfig,
    pub request_id: RequestIdConfig,
    pub request: RequestConfig,
    pub multipart: MultipartConfig,
    pub pool: PoolConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GzipConfig {
    pub enable: bool,
    /// 1 (fastest) to 9 (smallest).
    pub level: u32,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self { enable: true, level: 6 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestIdConfig {
    pub enable: bool,
    pub header: String,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self { enable: true, header: "X-Request-Id".to_owned() }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Upper bound on buffered request bodies, in bytes.
    pub max_body_size: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { max_body_size: 32 << 20 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MultipartConfig {
    pub enable: bool,
    /// File parts larger than this are spilled to a temporary file.
    pub max_memory: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self { enable: true, max_memory: 32 << 20 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle instances retained per pool; extra releases are dropped.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_idle: 1024 }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Validated, read-only engine settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub gzip_enabled: bool,
    pub gzip_level: u32,
    pub request_id_enabled: bool,
    pub request_id_header: HeaderName,
    pub max_body_size: usize,
    pub multipart_enabled: bool,
    pub multipart_max_memory: usize,
    pub pool_max_idle: usize,
}

impl Settings {
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, Error> {
        if !(1..=9).contains(&cfg.gzip.level) {
            return Err(Error::InvalidSetting {
                key: "gzip.level",
                reason: format!("{} is outside 1..=9", cfg.gzip.level),
            });
        }
        let request_id_header = HeaderName::try_from(cfg.request_id.header.as_str())
            .map_err(|e| Error::InvalidSetting {
                key: "request_id.header",
                reason: e.to_string(),
            })?;
        if cfg.request.max_body_size == 0 {
            return Err(Error::InvalidSetting {
                key: "request.max_body_size",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if cfg.multipart.max_memory == 0 {
            return Err(Error::InvalidSetting {
                key: "multipart.max_memory",
                reason: "must be greater than zero".to_owned(),
            });
        }

        Ok(Self {
            gzip_enabled: cfg.gzip.enable,
            gzip_level: cfg.gzip.level,
            request_id_enabled: cfg.request_id.enable,
            request_id_header,
            max_body_size: cfg.request.max_body_size,
            multipart_enabled: cfg.multipart.enable,
            multipart_max_memory: cfg.multipart.max_memory,
            pool_max_idle: cfg.pool.max_idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        let settings = Settings::from_config(&cfg).unwrap();
        assert!(settings.gzip_enabled);
        assert_eq!(settings.gzip_level, 6);
        assert!(settings.request_id_enabled);
        assert_eq!(settings.request_id_header, "x-request-id");
        assert!(settings.multipart_enabled);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [gzip]
            level = 5

            [request_id]
            header = "X-Test-Request-Id"

            [multipart]
            enable = false
            "#,
        )
        .unwrap();
        let settings = Settings::from_config(&cfg).unwrap();
        assert_eq!(settings.gzip_level, 5);
        assert!(settings.gzip_enabled);
        assert_eq!(settings.request_id_header, "x-test-request-id");
        assert!(!settings.multipart_enabled);
    }

    #[test]
    fn rejects_out_of_range_gzip_level() {
        let mut cfg = EngineConfig::default();
        cfg.gzip.level = 12;
        let err = Settings::from_config(&cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidSetting { key: "gzip.level", .. }));
    }

    #[test]
    fn rejects_malformed_header_name() {
        let mut cfg = EngineConfig::default();
        cfg.request_id.header = "bad header".to_owned();
        let err = Settings::from_config(&cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidSetting { key: "request_id.header", .. }));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(EngineConfig::from_toml_str("[gzip"), Err(Error::Config(_))));
    }
}
