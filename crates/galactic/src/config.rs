//! Agent configuration.
//!
//! Keys load from an optional YAML file, then environment variables with
//! the same names upper-cased override file values. A missing file falls
//! back to defaults; a malformed file is fatal.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::addr::Prefix;
use crate::error::AgentError;

/// Agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base IPv6 prefix for endpoint encoding.
    pub srv6_net: String,
    /// Unix-domain socket path for the local service.
    pub socket_path: PathBuf,
    /// Broker URL (`tcp://host:port`).
    pub mqtt_url: String,
    /// Broker client identifier; empty means a clean session.
    pub mqtt_clientid: String,
    /// Broker username; empty means no credentials.
    pub mqtt_username: String,
    /// Broker password.
    pub mqtt_password: String,
    /// Broker QoS level (0-2).
    pub mqtt_qos: u8,
    /// Topic for incoming route messages.
    pub mqtt_topic_receive: String,
    /// Topic for outgoing register/deregister messages.
    pub mqtt_topic_send: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            srv6_net: "fc00::/56".to_string(),
            socket_path: PathBuf::from("/var/run/galactic/agent.sock"),
            mqtt_url: "tcp://mqtt:1883".to_string(),
            mqtt_clientid: String::new(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_qos: 1,
            mqtt_topic_receive: "galactic/default/receive".to_string(),
            mqtt_topic_send: "galactic/default/send".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: file (if any), environment overrides, then
    /// validation.
    pub fn load(path: Option<&Path>) -> Result<Self, AgentError> {
        let mut config = match path {
            Some(p) => match std::fs::read_to_string(p) {
                Ok(contents) => {
                    info!(config = %p.display(), "using config file");
                    serde_yaml::from_str(&contents).map_err(|e| {
                        AgentError::InvalidConfig(format!("parsing {}: {}", p.display(), e))
                    })?
                }
                Err(_) => {
                    info!(config = %p.display(), "no config file found, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-variable overrides (same keys, upper-cased).
    fn apply_env(&mut self) -> Result<(), AgentError> {
        if let Ok(v) = env::var("SRV6_NET") {
            self.srv6_net = v;
        }
        if let Ok(v) = env::var("SOCKET_PATH") {
            self.socket_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("MQTT_URL") {
            self.mqtt_url = v;
        }
        if let Ok(v) = env::var("MQTT_CLIENTID") {
            self.mqtt_clientid = v;
        }
        if let Ok(v) = env::var("MQTT_USERNAME") {
            self.mqtt_username = v;
        }
        if let Ok(v) = env::var("MQTT_PASSWORD") {
            self.mqtt_password = v;
        }
        if let Ok(v) = env::var("MQTT_QOS") {
            self.mqtt_qos = v
                .parse()
                .map_err(|_| AgentError::InvalidConfig(format!("MQTT_QOS '{}'", v)))?;
        }
        if let Ok(v) = env::var("MQTT_TOPIC_RECEIVE") {
            self.mqtt_topic_receive = v;
        }
        if let Ok(v) = env::var("MQTT_TOPIC_SEND") {
            self.mqtt_topic_send = v;
        }
        Ok(())
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), AgentError> {
        self.base_prefix()?;

        if self.mqtt_qos > 2 {
            return Err(AgentError::InvalidConfig(format!(
                "mqtt_qos must be 0-2, got {}",
                self.mqtt_qos
            )));
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err(AgentError::InvalidConfig("socket_path is empty".into()));
        }

        if self.mqtt_topic_receive.is_empty() || self.mqtt_topic_send.is_empty() {
            return Err(AgentError::InvalidConfig("broker topics must be set".into()));
        }

        Ok(())
    }

    /// Parse the configured SRv6 base prefix.
    pub fn base_prefix(&self) -> Result<Prefix, AgentError> {
        self.srv6_net
            .parse::<Prefix>()
            .map_err(|e| AgentError::InvalidConfig(format!("srv6_net: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.srv6_net, "fc00::/56");
        assert_eq!(
            config.socket_path,
            PathBuf::from("/var/run/galactic/agent.sock")
        );
        assert_eq!(config.mqtt_url, "tcp://mqtt:1883");
        assert_eq!(config.mqtt_qos, 1);
        assert_eq!(config.mqtt_topic_receive, "galactic/default/receive");
        assert_eq!(config.mqtt_topic_send, "galactic/default/send");
        assert!(config.mqtt_clientid.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn yaml_overrides_defaults() {
        let yaml = r#"
srv6_net: "fd00::/48"
mqtt_qos: 2
mqtt_clientid: host-a
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.srv6_net, "fd00::/48");
        assert_eq!(config.mqtt_qos, 2);
        assert_eq!(config.mqtt_clientid, "host-a");
        // Untouched keys keep their defaults.
        assert_eq!(config.mqtt_url, "tcp://mqtt:1883");
        config.validate().unwrap();
    }

    #[test]
    fn qos_out_of_range_rejected() {
        let config = Config {
            mqtt_qos: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AgentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn base_prefix_must_be_v6_and_short() {
        let config = Config {
            srv6_net: "10.0.0.0/8".to_string(),
            ..Default::default()
        };
        // Parses as a prefix; the v6/length constraint is enforced by the
        // startup encode probe, not here.
        assert!(config.base_prefix().is_ok());

        let config = Config {
            srv6_net: "not-a-prefix".to_string(),
            ..Default::default()
        };
        assert!(config.base_prefix().is_err());
    }

    #[test]
    fn empty_socket_path_rejected() {
        let config = Config {
            socket_path: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
