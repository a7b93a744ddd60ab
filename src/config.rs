//! Peer configuration file
//!
//! ```toml
//! peers = ["/tmp/px-0", "/tmp/px-1", "/tmp/px-2"]
//! me = 0
//! network = "unix"        # or "tcp"
//! unreliable = false
//! retry_backoff_ms = 10
//! rpc_timeout_ms = 1000
//! workers = 4
//! ```

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::network::socket::SocketKind;
use crate::peer::{Options, MAX_RETRY_BACKOFF};

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
    Missing(&'static str),
    Invalid(String)
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read configuration: {}", e),
            ConfigError::Parse(e) => write!(f, "Malformed configuration: {}", e),
            ConfigError::Missing(key) => write!(f, "Missing configuration key: {}", key),
            ConfigError::Invalid(what) => write!(f, "Invalid configuration: {}", what)
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> ConfigError {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> ConfigError {
        ConfigError::Parse(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub peers: Vec<String>,
    pub me: usize,
    pub network: SocketKind,
    pub unreliable: bool,
    pub retry_backoff: Duration,
    pub rpc_timeout: Duration,
    pub workers: usize
}

fn get_u64(table: &toml::value::Table, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match table.get(key) {
        None => Ok(default),
        Some(toml::Value::Integer(i)) if *i >= 0 => Ok(*i as u64),
        Some(v) => Err(ConfigError::Invalid(format!("{} must be a non-negative integer, not {}", key, v)))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path)?;
        Config::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Config, ConfigError> {
        let value: toml::Value = s.parse()?;

        let table = match value.as_table() {
            Some(t) => t,
            None => return Err(ConfigError::Invalid("top level must be a table".to_string()))
        };

        let peers = match table.get("peers") {
            None => return Err(ConfigError::Missing("peers")),
            Some(toml::Value::Array(a)) => {
                let mut peers = Vec::with_capacity(a.len());
                for v in a {
                    match v.as_str() {
                        Some(s) => peers.push(s.to_string()),
                        None => return Err(ConfigError::Invalid(format!("peer address {} is not a string", v)))
                    }
                }
                peers
            },
            Some(_) => return Err(ConfigError::Invalid("peers must be an array".to_string()))
        };

        if peers.is_empty() {
            return Err(ConfigError::Invalid("peers must not be empty".to_string()));
        }

        let me = match table.get("me") {
            None => return Err(ConfigError::Missing("me")),
            Some(_) => get_u64(table, "me", 0)? as usize
        };

        let network = match table.get("network") {
            None => SocketKind::Unix,
            Some(v) => match v.as_str().and_then(SocketKind::from_name) {
                Some(kind) => kind,
                None => return Err(ConfigError::Invalid(format!("unknown network {}", v)))
            }
        };

        let unreliable = match table.get("unreliable") {
            None => false,
            Some(toml::Value::Boolean(b)) => *b,
            Some(v) => return Err(ConfigError::Invalid(format!("unreliable must be a boolean, not {}", v)))
        };

        let config = Config {
            peers,
            me,
            network,
            unreliable,
            retry_backoff: Duration::from_millis(get_u64(table, "retry_backoff_ms", 10)?),
            rpc_timeout: Duration::from_millis(get_u64(table, "rpc_timeout_ms", 1000)?),
            workers: get_u64(table, "workers", 4)? as usize
        };

        config.validate()?;

        Ok(config)
    }

    /// Checks the cross-field constraints. Call again after applying overrides
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.me >= self.peers.len() {
            return Err(ConfigError::Invalid(format!("me = {} but only {} peers are configured",
                self.me, self.peers.len())));
        }
        if self.rpc_timeout == Duration::from_millis(0) {
            return Err(ConfigError::Invalid("rpc_timeout_ms must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be positive".to_string()));
        }
        if self.retry_backoff > MAX_RETRY_BACKOFF {
            return Err(ConfigError::Invalid(format!("retry_backoff_ms may not exceed {}",
                MAX_RETRY_BACKOFF.as_millis())));
        }
        Ok(())
    }

    pub fn options(&self) -> Options {
        Options {
            retry_backoff: self.retry_backoff
        }
    }
}
