use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection_manager::DatabaseLocation;
use crate::page::{PageDefaults, DEFAULT_CUSTOM_QUERY};
use crate::query_runner::{IdentifierQuoting, RowLimit};

pub const DEFAULT_DATABASE_PATH: &str = "sap_b1_mock.db";
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8501;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ViewerConfig {
    pub database_path: PathBuf,
    pub bind_host: String,
    pub port: u16,
    pub page_title: String,
    pub heading: String,
    pub default_row_limit: u32,
    pub default_custom_query: String,
    pub identifier_quoting: IdentifierQuoting,
    pub log_filter: Option<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            page_title: "SAP B1 Mock DB Viewer".to_string(),
            heading: "SAP B1 Mock Database Viewer (Pakistani Data)".to_string(),
            default_row_limit: RowLimit::DEFAULT.get(),
            default_custom_query: DEFAULT_CUSTOM_QUERY.to_string(),
            identifier_quoting: IdentifierQuoting::Verbatim,
            log_filter: None,
        }
    }
}

impl ViewerConfig {
    #[must_use]
    pub fn database_location(&self) -> DatabaseLocation {
        DatabaseLocation::new(self.database_path.clone())
    }

    #[must_use]
    pub fn page_defaults(&self) -> PageDefaults {
        PageDefaults {
            row_limit: RowLimit::clamped(i64::from(self.default_row_limit)),
            custom_query: self.default_custom_query.clone(),
        }
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Reads a config file. A missing or blank file means "all defaults".
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ViewerConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(ViewerConfig::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if raw.trim().is_empty() {
        return Ok(ViewerConfig::default());
    }

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_default() -> Result<ViewerConfig, ConfigError> {
    load_from_path(default_config_path()?)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os("DBVIEW_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("dbview").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{load_from_path, ConfigError, ViewerConfig};
    use crate::query_runner::{IdentifierQuoting, RowLimit};

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let config =
            load_from_path(temp_dir.path().join("config.toml")).expect("failed to load config");

        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.database_path, PathBuf::from("sap_b1_mock.db"));
        assert_eq!(config.page_defaults().row_limit, RowLimit::DEFAULT);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "database_path = \"/srv/data/erp.db\"\nport = 9000\nidentifier_quoting = \"quoted\"\n",
        )
        .expect("failed to write config");

        let config = load_from_path(&path).expect("failed to load config");

        assert_eq!(config.database_path, PathBuf::from("/srv/data/erp.db"));
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.identifier_quoting, IdentifierQuoting::Quoted);
        assert_eq!(config.default_custom_query, "SELECT * FROM OUSR LIMIT 10;");
    }

    #[test]
    fn out_of_range_default_limit_is_clamped() {
        let config = ViewerConfig {
            default_row_limit: 20,
            ..ViewerConfig::default()
        };
        assert_eq!(config.page_defaults().row_limit.get(), RowLimit::MIN);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "port = \"not a number\"").expect("failed to write config");

        let err = load_from_path(&path).expect_err("parse should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
