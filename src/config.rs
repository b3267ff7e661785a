use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{Route, RoutingTable};
use crate::error::SleuthError;

pub const DEFAULT_CONFIG_FILE: &str = "houndsleuth.json";
pub const DEFAULT_MARKER: &str = "form-data.txt";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub bucket: BucketConfig,
    pub routes: Vec<RouteEntry>,
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub ledger: Option<Utf8PathBuf>,
    #[serde(default)]
    pub lock: Option<Utf8PathBuf>,
    #[serde(default)]
    pub staging_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub handler_timeout_secs: Option<u64>,
    #[serde(default)]
    pub log_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BucketConfig {
    Http {
        url: String,
        #[serde(default)]
        token_env: Option<String>,
    },
    Local {
        root: Utf8PathBuf,
    },
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RouteEntry {
    pub prefix: String,
    pub handler: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub bucket: BucketConfig,
    pub routing: RoutingTable,
    pub marker: String,
    pub ledger_path: Utf8PathBuf,
    pub lock_path: Utf8PathBuf,
    pub staging_root: Utf8PathBuf,
    pub handler_timeout: Option<Duration>,
    pub log_file: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SleuthError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(SleuthError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SleuthError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SleuthError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SleuthError> {
        let routes = config
            .routes
            .into_iter()
            .map(|entry| Route {
                prefix: entry.prefix,
                handler: entry.handler,
            })
            .collect();
        let routing = RoutingTable::new(routes)?;

        let marker = config
            .marker
            .unwrap_or_else(|| DEFAULT_MARKER.to_string());
        if marker.is_empty() || marker.starts_with('/') {
            return Err(SleuthError::InvalidConfig(format!(
                "marker must be a relative object name: {marker:?}"
            )));
        }

        match &config.bucket {
            BucketConfig::Http { url, .. } if url.trim().is_empty() => {
                return Err(SleuthError::InvalidConfig(
                    "bucket url must not be empty".to_string(),
                ));
            }
            BucketConfig::Local { root } if root.as_str().is_empty() => {
                return Err(SleuthError::InvalidConfig(
                    "bucket root must not be empty".to_string(),
                ));
            }
            _ => {}
        }

        let handler_timeout = match config.handler_timeout_secs {
            Some(0) => {
                return Err(SleuthError::InvalidConfig(
                    "handler_timeout_secs must be positive".to_string(),
                ));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let needs_state_dir =
            config.ledger.is_none() || config.lock.is_none() || config.staging_root.is_none();
        let state_dir = if needs_state_dir {
            Some(default_state_dir()?)
        } else {
            None
        };
        let from_state_dir = |name: &str| {
            state_dir
                .as_ref()
                .map(|dir| dir.join(name))
                .unwrap_or_default()
        };

        Ok(ResolvedConfig {
            bucket: config.bucket,
            routing,
            marker,
            ledger_path: config
                .ledger
                .unwrap_or_else(|| from_state_dir("processed_folders.log")),
            lock_path: config
                .lock
                .unwrap_or_else(|| from_state_dir("houndsleuth.lock")),
            staging_root: config
                .staging_root
                .unwrap_or_else(|| from_state_dir("staging")),
            handler_timeout,
            log_file: config.log_file,
        })
    }
}

pub fn default_state_dir() -> Result<Utf8PathBuf, SleuthError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".local")
                    .join("share")
                    .join("houndsleuth"),
            )
            .ok()
        })
        .ok_or_else(|| SleuthError::Filesystem("unable to resolve state directory".to_string()))
}
