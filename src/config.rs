use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `GYMSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "gymslot".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T: FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError { var, value }),
            }
        }

        let defaults = Self::default();
        let config = Self {
            port: parsed(&lookup, "GYMSLOT_PORT")?.unwrap_or(defaults.port),
            bind: lookup("GYMSLOT_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("GYMSLOT_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("GYMSLOT_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "GYMSLOT_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "GYMSLOT_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "GYMSLOT_METRICS_PORT")?,
            tls_cert: lookup("GYMSLOT_TLS_CERT"),
            tls_key: lookup("GYMSLOT_TLS_KEY"),
        };
        if config.max_connections == 0 {
            return Err(ConfigError {
                var: "GYMSLOT_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("gymslot.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/gymslot.wal"));
    }

    #[test]
    fn overrides() {
        let config = from(&[
            ("GYMSLOT_PORT", "6000"),
            ("GYMSLOT_DATA_DIR", "/var/lib/gymslot"),
            ("GYMSLOT_COMPACT_THRESHOLD", " 50 "),
            ("GYMSLOT_METRICS_PORT", "9000"),
            ("GYMSLOT_TLS_CERT", "cert.pem"),
        ])
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9000));
        assert_eq!(config.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(config.tls_key, None);
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/gymslot/gymslot.wal"));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = from(&[("GYMSLOT_PORT", "seventy")]).unwrap_err();
        assert_eq!(err.var, "GYMSLOT_PORT");
        assert!(from(&[("GYMSLOT_MAX_CONNECTIONS", "0")]).is_err());
        assert!(from(&[("GYMSLOT_METRICS_PORT", "70000")]).is_err());
    }
}
