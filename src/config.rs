//! Environment-driven configuration.
//!
//! Every recognized option is an `MK_*` environment variable; the only
//! file the daemon reads at startup is the optional targets/rules YAML
//! (`MK_TARGETS_FILE`), which declares SNMP/Modbus/OPC-UA targets, zone
//! definitions, and extra classifier rules.
//!
//! Configuration errors are fatal: the process exits with code 1 before
//! any collector starts.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use mk_collectors::modbus::ModbusTargetConfig;
use mk_collectors::opcua::OpcUaConfig;
use mk_collectors::snmp::SnmpTargetConfig;
use mk_collectors::syslog::SyslogProtocol;
use mk_collectors::CollectorConfig;
use mk_model::{Cidr, ZoneDefinition};
use mk_transport::TransportConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bad targets file: {0}")]
    TargetsFile(String),
}

/// Deployment environment; production tightens security requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone)]
pub struct SyslogConfig {
    pub port: u16,
    pub protocol: SyslogProtocol,
}

#[derive(Debug, Clone)]
pub struct AlertingConfig {
    pub email: Option<String>,
    pub webhook: Option<String>,
}

/// The targets/rules file shape.
#[derive(Debug, Default, Deserialize)]
pub struct TargetsFile {
    #[serde(default)]
    pub snmp: Vec<SnmpTargetConfig>,
    #[serde(default)]
    pub modbus: Vec<ModbusTargetConfig>,
    #[serde(default)]
    pub opcua: Option<OpcUaConfig>,
    #[serde(default)]
    pub zones: Vec<ZoneDefinition>,
}

#[derive(Debug)]
pub struct AppConfig {
    pub environment: Environment,
    pub app_name: String,
    pub broker: Option<TransportConfig>,
    pub database: DatabaseConfig,
    pub collector: CollectorConfig,
    pub require_auth_priv: bool,
    pub syslog: SyslogConfig,
    pub netflow_port: u16,
    pub discovery_subnets: Vec<Cidr>,
    pub targets: TargetsFile,
    /// Extra classifier rules YAML, already read from disk.
    pub rules_yaml: Option<String>,
    pub alerting: AlertingConfig,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match var("MK_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            _ => Environment::Development,
        };
        let app_name = var("MK_APP_NAME").unwrap_or_else(|| "murakumo".to_string());

        let broker = match var("MK_BROKER_HOST") {
            Some(host) => {
                let ca = var("MK_BROKER_CA").ok_or(ConfigError::Missing("MK_BROKER_CA"))?;
                let cert = var("MK_BROKER_CERT").ok_or(ConfigError::Missing("MK_BROKER_CERT"))?;
                let key = var("MK_BROKER_KEY").ok_or(ConfigError::Missing("MK_BROKER_KEY"))?;
                let mut config = TransportConfig::new(host, ca, cert, key, app_name.clone());
                if let Some(port) = parse_var::<u16>("MK_BROKER_PORT")? {
                    config.port = port;
                }
                if let Some(secs) = parse_var::<u64>("MK_BROKER_KEEPALIVE_SECS")? {
                    config.keep_alive = Duration::from_secs(secs);
                }
                if let Some(secs) = parse_var::<u64>("MK_BROKER_RECONNECT_SECS")? {
                    config.reconnect_period = Duration::from_secs(secs);
                }
                if let Some(attempts) = parse_var::<u32>("MK_BROKER_MAX_RECONNECTS")? {
                    config.max_reconnect_attempts = attempts;
                }
                Some(config)
            }
            None => {
                if environment == Environment::Production {
                    return Err(ConfigError::Missing("MK_BROKER_HOST"));
                }
                None
            }
        };

        let database = DatabaseConfig {
            path: var("MK_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("murakumo.db")),
            pool_size: parse_var::<usize>("MK_DB_POOL_SIZE")?.unwrap_or(10),
        };

        let mut collector = CollectorConfig::default();
        if let Some(secs) = parse_var::<u64>("MK_POLL_INTERVAL_SECS")? {
            collector.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("MK_COLLECT_TIMEOUT_SECS")? {
            collector.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_var::<u32>("MK_COLLECT_RETRIES")? {
            collector.retries = retries;
        }
        if let Some(size) = parse_var::<usize>("MK_BATCH_SIZE")? {
            collector.batch_size = size;
        }
        if let Some(limit) = parse_var::<usize>("MK_MAX_CONCURRENT")? {
            collector.max_concurrent = limit;
        }

        let syslog = SyslogConfig {
            port: parse_var::<u16>("MK_SYSLOG_PORT")?.unwrap_or(514),
            protocol: match var("MK_SYSLOG_PROTOCOL").as_deref() {
                None | Some("udp") => SyslogProtocol::Udp,
                Some("tcp") => SyslogProtocol::Tcp,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        name: "MK_SYSLOG_PROTOCOL",
                        value: other.to_string(),
                        reason: "expected udp or tcp".to_string(),
                    })
                }
            },
        };
        let netflow_port = parse_var::<u16>("MK_NETFLOW_PORT")?.unwrap_or(2055);

        // Security settings. The encryption key protects secrets at
        // rest and must carry real entropy.
        if let Some(key) = var("MK_ENCRYPTION_KEY") {
            validate_encryption_key(&key)?;
        } else if environment == Environment::Production {
            return Err(ConfigError::Missing("MK_ENCRYPTION_KEY"));
        }
        if let Some(version) = var("MK_TLS_MIN_VERSION") {
            if version != "1.3" {
                return Err(ConfigError::Invalid {
                    name: "MK_TLS_MIN_VERSION",
                    value: version,
                    reason: "only TLS 1.3 is supported".to_string(),
                });
            }
        }

        let discovery_subnets = match var("MK_DISCOVERY_SUBNETS") {
            Some(list) => list
                .split(',')
                .map(|s| {
                    s.trim().parse::<Cidr>().map_err(|e| ConfigError::Invalid {
                        name: "MK_DISCOVERY_SUBNETS",
                        value: s.trim().to_string(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let targets = match var("MK_TARGETS_FILE") {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path, source })?;
                serde_yaml::from_str(&text)
                    .map_err(|e| ConfigError::TargetsFile(e.to_string()))?
            }
            None => TargetsFile::default(),
        };

        let rules_yaml = match var("MK_RULES_FILE") {
            Some(path) => {
                let path = PathBuf::from(path);
                Some(
                    std::fs::read_to_string(&path)
                        .map_err(|source| ConfigError::Io { path, source })?,
                )
            }
            None => None,
        };

        let require_auth_priv = parse_var::<bool>("MK_SNMP_REQUIRE_AUTH_PRIV")?
            .unwrap_or(environment == Environment::Production);

        Ok(AppConfig {
            environment,
            app_name,
            broker,
            database,
            collector,
            require_auth_priv,
            syslog,
            netflow_port,
            discovery_subnets,
            targets,
            rules_yaml,
            alerting: AlertingConfig {
                email: var("MK_ALERT_EMAIL"),
                webhook: var("MK_ALERT_WEBHOOK"),
            },
        })
    }

    /// Hosts polled over SNMP, for log banners.
    pub fn snmp_hosts(&self) -> Vec<Ipv4Addr> {
        self.targets.snmp.iter().map(|t| t.host).collect()
    }
}

fn validate_encryption_key(key: &str) -> Result<(), ConfigError> {
    if key.len() < 32 {
        return Err(ConfigError::Invalid {
            name: "MK_ENCRYPTION_KEY",
            value: "<redacted>".to_string(),
            reason: "must be at least 32 characters".to_string(),
        });
    }
    // A key of one repeated character clears the length bar with no
    // entropy at all.
    let distinct: std::collections::HashSet<char> = key.chars().collect();
    if distinct.len() < 8 {
        return Err(ConfigError::Invalid {
            name: "MK_ENCRYPTION_KEY",
            value: "<redacted>".to_string(),
            reason: "too little entropy (fewer than 8 distinct characters)".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_key_validation() {
        assert!(validate_encryption_key("a".repeat(31).as_str()).is_err());
        assert!(validate_encryption_key("a".repeat(64).as_str()).is_err());
        assert!(validate_encryption_key("correct-horse-battery-staple-0123456789").is_ok());
    }

    #[test]
    fn test_targets_file_parsing() {
        let yaml = r#"
snmp:
  - host: 10.0.1.50
    security_name: ops
    security_level: authPriv
    auth_protocol: SHA-256
    auth_key: eight-chars-min
    priv_protocol: AES-128
    priv_key: also-eight-chars
modbus:
  - host: 10.0.1.60
    unit_id: 1
    registers:
      - name: line_speed
        address: 100
        kind: holding_register
        data_type: uint16
        scale: 0.1
        unit: m/s
zones:
  - name: line1-control
    purdue_level: level1
    security_zone: control
    subnets: ["10.0.1.0/24"]
"#;
        let file: TargetsFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.snmp.len(), 1);
        assert_eq!(file.snmp[0].port, 161);
        assert_eq!(file.modbus.len(), 1);
        assert_eq!(file.modbus[0].port, 502);
        assert_eq!(file.modbus[0].registers.len(), 1);
        assert_eq!(file.zones.len(), 1);
        assert!(file.opcua.is_none());
    }
}
