use std::{env, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BODY_LIMIT_MB: usize = 16;
pub const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:5020/classify";
pub const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MODEL_NAME: &str = "Jayanth2002/dinov2-base-finetuned-SkinDisease";
pub const DEFAULT_MODEL_PATH: &str = "./model/frozen_graph.pb";
pub const DEFAULT_CLASS_LIST_PATH: &str = "./model/class_list.txt";
pub const DEFAULT_MODEL_INPUT_SIZE: u32 = 224;
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:5174",
    "http://localhost:5175",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("unknown classifier backend '{0}' (expected 'remote' or 'tensorflow')")]
    UnknownBackend(String),
    #[error("classifier backend '{0}' is not compiled in; rebuild with --features {0}")]
    BackendNotCompiled(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    TensorFlow,
}

impl BackendKind {
    fn default_for_build() -> Self {
        if cfg!(feature = "tensorflow") {
            BackendKind::TensorFlow
        } else {
            BackendKind::Remote
        }
    }
}

/// Only read by the frozen-graph backend.
#[cfg_attr(not(feature = "tensorflow"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq)]
pub struct TensorFlowConfig {
    pub model_path: PathBuf,
    pub class_list_path: PathBuf,
    pub model_url: Option<String>,
    pub class_list_url: Option<String>,
    pub input_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub body_limit_bytes: usize,
    pub backend: BackendKind,
    pub classifier_url: String,
    pub classifier_token: Option<String>,
    pub classifier_timeout: Duration,
    pub model_name: String,
    pub cors_origins: Vec<String>,
    pub tensorflow: TensorFlowConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let port = parse_or(&var, "PORT", DEFAULT_PORT)?;
        let body_limit_mb: usize = parse_or(&var, "BODY_LIMIT_MB", DEFAULT_BODY_LIMIT_MB)?;
        let timeout_secs: u64 =
            parse_or(&var, "CLASSIFIER_TIMEOUT_SECS", DEFAULT_CLASSIFIER_TIMEOUT_SECS)?;
        let input_size: u32 = parse_or(&var, "MODEL_INPUT_SIZE", DEFAULT_MODEL_INPUT_SIZE)?;

        let body_limit_bytes = body_limit_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::Invalid {
                name: "BODY_LIMIT_MB",
                value: body_limit_mb.to_string(),
                reason: "too large".to_string(),
            })?;

        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "CLASSIFIER_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let backend = match var("CLASSIFIER_BACKEND") {
            None => BackendKind::default_for_build(),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "remote" => BackendKind::Remote,
                "tensorflow" if cfg!(feature = "tensorflow") => BackendKind::TensorFlow,
                "tensorflow" => return Err(ConfigError::BackendNotCompiled("tensorflow")),
                _ => return Err(ConfigError::UnknownBackend(value)),
            },
        };

        let cors_origins = match var("CORS_ORIGINS") {
            Some(origins) => origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Config {
            port,
            body_limit_bytes,
            backend,
            classifier_url: var("CLASSIFIER_URL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string()),
            classifier_token: var("CLASSIFIER_TOKEN"),
            classifier_timeout: Duration::from_secs(timeout_secs),
            model_name: var("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            cors_origins,
            tensorflow: TensorFlowConfig {
                model_path: var("MODEL_PATH")
                    .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string())
                    .into(),
                class_list_path: var("CLASS_LIST_PATH")
                    .unwrap_or_else(|| DEFAULT_CLASS_LIST_PATH.to_string())
                    .into(),
                model_url: var("MODEL_URL"),
                class_list_url: var("CLASS_LIST_URL"),
                input_size,
            },
        })
    }
}

fn parse_or<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            value,
            reason: err.to_string(),
        }),
    }
}
