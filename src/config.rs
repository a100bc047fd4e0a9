use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MODEL_PATH: &str = "./model/best.pb";
const DEFAULT_CLASS_LIST_PATH: &str = "./model/class_list.txt";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Service settings, read from the environment at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    /// Upload cap in bytes; `None` accepts bodies of any size.
    pub body_limit_bytes: Option<usize>,
    pub model_path: PathBuf,
    pub class_list_path: PathBuf,
    pub model_url: Option<String>,
    pub class_list_url: Option<String>,
    pub github_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = parse(
            "PORT",
            "a port number between 0 and 65535",
            non_empty("PORT"),
            DEFAULT_PORT,
        )?;
        let body_limit_bytes = match non_empty("BODY_LIMIT_MB") {
            None => None,
            Some(value) => {
                let invalid = || ConfigError::Invalid {
                    name: "BODY_LIMIT_MB",
                    expected: "a non-negative number of MiB that fits in memory",
                    value: value.clone(),
                };
                let mb: usize = value.trim().parse().map_err(|_| invalid())?;
                Some(mb.checked_mul(1024 * 1024).ok_or_else(invalid)?)
            }
        };

        Ok(Config {
            port,
            body_limit_bytes,
            model_path: non_empty("MODEL_PATH")
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.into())
                .into(),
            class_list_path: non_empty("CLASS_LIST_PATH")
                .unwrap_or_else(|| DEFAULT_CLASS_LIST_PATH.into())
                .into(),
            model_url: non_empty("MODEL_URL"),
            class_list_url: non_empty("CLASS_LIST_URL"),
            github_token: non_empty("GITHUB_TOKEN"),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

fn parse<T: FromStr>(
    name: &'static str,
    expected: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.body_limit_bytes, None);
        assert_eq!(config.model_path, PathBuf::from("./model/best.pb"));
        assert_eq!(
            config.class_list_path,
            PathBuf::from("./model/class_list.txt")
        );
        assert_eq!(config.model_url, None);
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:5000");
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("BODY_LIMIT_MB", "2"),
            ("MODEL_PATH", "/srv/tea.pb"),
            ("MODEL_URL", "https://example.com/tea.pb"),
            ("GITHUB_TOKEN", ""),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.body_limit_bytes, Some(2 * 1024 * 1024));
        assert_eq!(config.model_path, PathBuf::from("/srv/tea.pb"));
        assert_eq!(config.model_url.as_deref(), Some("https://example.com/tea.pb"));
        assert_eq!(config.github_token, None);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config(&[("PORT", "abc")]).unwrap_err();
        assert!(err.to_string().starts_with("PORT must be"));

        let err = config(&[("BODY_LIMIT_MB", "-1")]).unwrap_err();
        assert!(err.to_string().contains("BODY_LIMIT_MB"));

        assert!(config(&[("PORT", "70000")]).is_err());
    }

    #[test]
    fn oversized_body_limit_is_rejected() {
        let huge = usize::MAX.to_string();
        let err = config(&[("BODY_LIMIT_MB", huge.as_str())]).unwrap_err();

        assert!(err.to_string().starts_with("BODY_LIMIT_MB must be"));
    }
}
