//! Adapter selection settings.
//!
//! Settings come from an optional TOML file named by `CBMBUS_CONFIG`:
//!
//! ```toml
//! default = "xum1541:0"
//!
//! [adapter.xum1541]
//! active = true
//! status_timeout_ms = 0
//! ```
//!
//! `CBMBUS_ADAPTER` overrides `default`.  An adapter string has the form
//! `name[:port]`; an empty name selects the default adapter.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::CbmError;

pub const CONFIG_ENV: &str = "CBMBUS_CONFIG";
pub const ADAPTER_ENV: &str = "CBMBUS_ADAPTER";
pub const DEFAULT_ADAPTER: &str = "xum1541";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Adapter used when none is named.
    pub default: String,
    /// Per-adapter settings keyed by backend name.
    pub adapter: BTreeMap<String, AdapterConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterConfig {
    pub active: bool,
    /// Per-attempt timeout for status reads; zero waits indefinitely.
    pub status_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            default: DEFAULT_ADAPTER.to_string(),
            adapter: BTreeMap::new(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> AdapterConfig {
        AdapterConfig {
            active: true,
            status_timeout_ms: 0,
        }
    }
}

impl AdapterConfig {
    pub fn status_timeout(&self) -> Option<Duration> {
        match self.status_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl FromStr for Config {
    type Err = io::Error;

    fn from_str(text: &str) -> io::Result<Config> {
        toml::from_str(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Config> {
        let text = fs::read_to_string(path.as_ref())?;
        debug!("loaded configuration from {}", path.as_ref().display());
        text.parse()
    }

    /// Build the configuration from the environment.
    pub fn from_env() -> io::Result<Config> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Ok(adapter) = env::var(ADAPTER_ENV) {
            if !adapter.is_empty() {
                config.default = adapter;
            }
        }
        Ok(config)
    }

    /// Settings for a backend, falling back to defaults when unlisted.
    pub fn adapter(&self, name: &str) -> AdapterConfig {
        self.adapter.get(name).cloned().unwrap_or_default()
    }

    /// Fill in the parts of `spec` left open, using the default adapter.
    pub fn complete(&self, spec: &AdapterSpec) -> io::Result<AdapterSpec> {
        if spec.name.is_some() {
            return Ok(spec.clone());
        }
        let default: AdapterSpec = self.default.parse()?;
        let name = match default.name {
            Some(name) => name,
            None => return Err(CbmError::NoBackend.into()),
        };
        Ok(AdapterSpec {
            name: Some(name),
            port: spec.port.clone().or(default.port),
        })
    }
}

/// A backend name with an optional port, as in `xum1541:2`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterSpec {
    pub name: Option<String>,
    pub port: Option<String>,
}

impl AdapterSpec {
    pub fn named(name: &str) -> AdapterSpec {
        AdapterSpec {
            name: Some(name.to_string()),
            port: None,
        }
    }
}

impl FromStr for AdapterSpec {
    type Err = io::Error;

    fn from_str(text: &str) -> io::Result<AdapterSpec> {
        let (name, port) = match text.find(':') {
            Some(index) => (&text[..index], Some(&text[index + 1..])),
            None => (text, None),
        };
        if name.contains(char::is_whitespace) {
            return Err(CbmError::InvalidArgument.into());
        }
        Ok(AdapterSpec {
            name: Some(name).filter(|n| !n.is_empty()).map(str::to_string),
            port: port.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }
}

impl fmt::Display for AdapterSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or(""))?;
        if let Some(ref port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_spec() {
        let spec: AdapterSpec = "xum1541:3".parse().unwrap();
        assert_eq!(spec.name.as_deref(), Some("xum1541"));
        assert_eq!(spec.port.as_deref(), Some("3"));
        assert_eq!(spec.to_string(), "xum1541:3");

        let spec: AdapterSpec = ":7".parse().unwrap();
        assert_eq!(spec.name, None);
        assert_eq!(spec.port.as_deref(), Some("7"));

        let spec: AdapterSpec = "".parse().unwrap();
        assert_eq!(spec, AdapterSpec::default());

        assert!("bad name".parse::<AdapterSpec>().is_err());
    }

    #[test]
    fn test_parse_config() {
        let config: Config = r#"
            default = "sim:1"

            [adapter.xum1541]
            active = false

            [adapter.sim]
            status_timeout_ms = 250
        "#
        .parse()
        .unwrap();
        assert_eq!(config.default, "sim:1");
        assert!(!config.adapter("xum1541").active);
        assert!(config.adapter("sim").active);
        assert_eq!(
            config.adapter("sim").status_timeout(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.adapter("other"), AdapterConfig::default());
    }

    #[test]
    fn test_reject_unknown_keys() {
        assert!("colour = 1".parse::<Config>().is_err());
    }

    #[test]
    fn test_complete_spec() {
        let config = Config {
            default: "xum1541:2".to_string(),
            adapter: BTreeMap::new(),
        };
        let spec = config.complete(&AdapterSpec::default()).unwrap();
        assert_eq!(spec.to_string(), "xum1541:2");
        let spec = config.complete(&":5".parse().unwrap()).unwrap();
        assert_eq!(spec.to_string(), "xum1541:5");
        let spec = config.complete(&AdapterSpec::named("sim")).unwrap();
        assert_eq!(spec.to_string(), "sim");

        let empty = Config {
            default: String::new(),
            adapter: BTreeMap::new(),
        };
        let error = empty.complete(&AdapterSpec::default()).unwrap_err();
        assert!(error == CbmError::NoBackend);
    }
}
