use anyhow::{Context, Result};
use clap::Parser;
use rt::PluginEnv;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::decoder::HEADER_SIZE;

pub const CONFIG_FILE_NAME: &str = "netflow-v5.yaml";

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| {
        format!(
            "invalid duration '{}' (examples: '1s', '5m', '1h'): {}",
            value, e
        )
    })
}

fn default_listen() -> Vec<String> {
    vec!["0.0.0.0:2055".to_string()]
}

fn default_max_packet_size() -> usize {
    1500
}

fn default_report_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_name() -> String {
    "Netflow".to_string()
}

fn default_deltatime() -> u64 {
    300
}

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// UDP address to receive NetFlow v5 on. Repeat to listen on several ports.
    #[arg(long = "netflow-listen", default_values_t = default_listen())]
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,

    #[arg(long = "netflow-max-packet-size", default_value_t = 1500)]
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Kernel receive buffer in bytes; 0 keeps the system default.
    #[arg(long = "netflow-receive-buffer", default_value_t = 0)]
    #[serde(default)]
    pub receive_buffer: usize,

    #[arg(
        long = "netflow-report-interval",
        default_value = "5m",
        value_parser = parse_duration
    )]
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_packet_size: default_max_packet_size(),
            receive_buffer: 0,
            report_interval: default_report_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrafficProtocol {
    Tcp,
    Udp,
}

/// One monitored-traffic sensor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TrafficMonitorConfig {
    pub name: String,
    #[serde(default)]
    pub saddr: Option<Ipv4Addr>,
    #[serde(default)]
    pub daddr: Option<Ipv4Addr>,
    #[serde(default)]
    pub sport: Option<u16>,
    #[serde(default, alias = "pport")]
    pub dport: Option<u16>,
    #[serde(default)]
    pub protocol: Option<TrafficProtocol>,
    #[serde(default)]
    pub packet_count: Option<u64>,
    #[serde(default)]
    pub bytes_count: Option<u64>,
    /// Window length in seconds.
    #[serde(default = "default_deltatime")]
    pub deltatime: u64,
}

impl Default for TrafficMonitorConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            saddr: None,
            daddr: None,
            sport: None,
            dport: None,
            protocol: None,
            packet_count: None,
            bytes_count: None,
            deltatime: default_deltatime(),
        }
    }
}

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[command(name = "netflow-v5-collector")]
#[command(about = "NetFlow v5 collector with monitored-traffic sensors")]
#[command(version = "0.1")]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    #[command(flatten)]
    #[serde(default, rename = "listener")]
    pub listener: ListenerConfig,

    #[arg(long = "netflow-name", default_value = "Netflow")]
    #[serde(default = "default_name")]
    pub name: String,

    #[arg(skip)]
    #[serde(default)]
    pub monitored_traffic: Vec<TrafficMonitorConfig>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            name: default_name(),
            monitored_traffic: Vec::new(),
        }
    }
}

impl PluginConfig {
    pub fn new() -> Result<Self> {
        let env = PluginEnv::from_environment();

        let cfg = if env.has_config_dirs() {
            Self::load_from_plugin_env(&env)?
        } else {
            Self::parse()
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn load_from_plugin_env(env: &PluginEnv) -> Result<Self> {
        match env.find_config_file(CONFIG_FILE_NAME) {
            Some(path) => Self::from_yaml_file(&path).with_context(|| {
                format!("failed to load netflow config from {}", path.display())
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg = serde_yaml::from_str::<Self>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Parsed listen addresses. Call after [`PluginConfig::validate`].
    pub fn listen_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.listener
            .listen
            .iter()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("invalid listener address: {}", addr))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.listener.listen.is_empty() {
            anyhow::bail!("listener.listen must contain at least one address");
        }
        let addrs = self.listen_addrs()?;
        let mut seen = HashSet::new();
        for addr in &addrs {
            if !seen.insert(addr) {
                anyhow::bail!("listener.listen contains {} more than once", addr);
            }
        }

        if self.listener.max_packet_size < HEADER_SIZE {
            anyhow::bail!("listener.max_packet_size must be at least {}", HEADER_SIZE);
        }
        if self.listener.max_packet_size > usize::from(u16::MAX) {
            anyhow::bail!("listener.max_packet_size must be at most {}", u16::MAX);
        }
        if self.listener.report_interval.is_zero() {
            anyhow::bail!("listener.report_interval must be greater than 0");
        }

        let mut names = HashSet::new();
        for (idx, monitor) in self.monitored_traffic.iter().enumerate() {
            let name = monitor.name.trim();
            if name.is_empty() {
                anyhow::bail!("monitored_traffic[{idx}].name must be non-empty");
            }
            if !names.insert(name) {
                anyhow::bail!("monitored_traffic[{idx}].name '{name}' is not unique");
            }
            if monitor.deltatime == 0 {
                anyhow::bail!("monitored_traffic.{name}.deltatime must be greater than 0");
            }
            if monitor.packet_count == Some(0) {
                anyhow::bail!("monitored_traffic.{name}.packet_count must be greater than 0");
            }
            if monitor.bytes_count == Some(0) {
                anyhow::bail!("monitored_traffic.{name}.bytes_count must be greater than 0");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_2055() {
        let cfg = PluginConfig::default();
        assert_eq!(
            cfg.listen_addrs().expect("default address parses"),
            vec!["0.0.0.0:2055".parse::<SocketAddr>().expect("valid socket address")]
        );
        assert_eq!(cfg.listener.max_packet_size, 1500);
        assert_eq!(cfg.listener.report_interval, Duration::from_secs(300));
        assert_eq!(cfg.name, "Netflow");
        cfg.validate().expect("default configuration should be valid");
    }

    #[test]
    fn cli_flags_accept_multiple_listeners() {
        let cfg = PluginConfig::try_parse_from([
            "netflow-v5-collector",
            "--netflow-listen",
            "0.0.0.0:2055",
            "--netflow-listen",
            "0.0.0.0:9995",
            "--netflow-report-interval",
            "30s",
        ])
        .expect("flags should parse");

        assert_eq!(cfg.listener.listen, vec!["0.0.0.0:2055", "0.0.0.0:9995"]);
        assert_eq!(cfg.listener.report_interval, Duration::from_secs(30));
        cfg.validate().expect("configuration should be valid");
    }

    #[test]
    fn cli_without_flags_uses_defaults() {
        let cfg = PluginConfig::try_parse_from(["netflow-v5-collector"]).expect("no flags");
        assert_eq!(cfg.listener.listen, default_listen());
        assert!(cfg.monitored_traffic.is_empty());
    }

    #[test]
    fn validate_rejects_empty_listen_list() {
        let mut cfg = PluginConfig::default();
        cfg.listener.listen.clear();
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("at least one address"));
    }

    #[test]
    fn validate_rejects_bad_listen_address() {
        let mut cfg = PluginConfig::default();
        cfg.listener.listen = vec!["not-an-address".to_string()];
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("invalid listener address"));
    }

    #[test]
    fn validate_rejects_duplicate_listen_address() {
        let mut cfg = PluginConfig::default();
        cfg.listener.listen = vec!["0.0.0.0:2055".to_string(), "0.0.0.0:2055".to_string()];
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn validate_rejects_packet_size_below_header() {
        let mut cfg = PluginConfig::default();
        cfg.listener.max_packet_size = HEADER_SIZE - 1;
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("max_packet_size"));
    }

    #[test]
    fn validate_rejects_zero_report_interval() {
        let mut cfg = PluginConfig::default();
        cfg.listener.report_interval = Duration::ZERO;
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("report_interval"));
    }

    #[test]
    fn validate_rejects_duplicate_monitor_names() {
        let mut cfg = PluginConfig::default();
        let monitor = TrafficMonitorConfig {
            name: "nas".to_string(),
            ..TrafficMonitorConfig::default()
        };
        cfg.monitored_traffic = vec![monitor.clone(), monitor];
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("is not unique"));
    }

    #[test]
    fn validate_rejects_zero_deltatime() {
        let mut cfg = PluginConfig::default();
        cfg.monitored_traffic.push(TrafficMonitorConfig {
            name: "nas".to_string(),
            deltatime: 0,
            ..TrafficMonitorConfig::default()
        });
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("deltatime must be greater than 0"));
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
listener:
  listen: ["127.0.0.1:9996"]
  report_interval: 1m
name: Home
monitored_traffic:
  - name: nas-backup
    saddr: 192.168.2.124
    dport: 873
    protocol: tcp
    bytes_count: 1000000
    deltatime: 600
  - name: legacy-key
    pport: 53
"#,
        )
        .expect("write config");

        let cfg = PluginConfig::from_yaml_file(&path).expect("config should load");
        cfg.validate().expect("configuration should be valid");

        assert_eq!(cfg.listener.listen, vec!["127.0.0.1:9996"]);
        assert_eq!(cfg.listener.max_packet_size, 1500);
        assert_eq!(cfg.listener.report_interval, Duration::from_secs(60));
        assert_eq!(cfg.name, "Home");
        assert_eq!(cfg.monitored_traffic.len(), 2);

        let nas = &cfg.monitored_traffic[0];
        assert_eq!(nas.saddr, Some(Ipv4Addr::new(192, 168, 2, 124)));
        assert_eq!(nas.dport, Some(873));
        assert_eq!(nas.protocol, Some(TrafficProtocol::Tcp));
        assert_eq!(nas.bytes_count, Some(1_000_000));
        assert_eq!(nas.deltatime, 600);

        let legacy = &cfg.monitored_traffic[1];
        assert_eq!(legacy.dport, Some(53));
        assert_eq!(legacy.deltatime, 300);
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "listener:\n  port: 2055\n").expect("write config");

        let err = PluginConfig::from_yaml_file(&path).expect_err("unknown key should fail");
        assert!(format!("{err:#}").contains("failed to parse"));
    }

    #[test]
    fn yaml_rejects_unknown_protocol() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "monitored_traffic:\n  - name: x\n    protocol: icmp\n",
        )
        .expect("write config");

        assert!(PluginConfig::from_yaml_file(&path).is_err());
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let env = PluginEnv {
            user_config_dir: Some(dir.path().to_path_buf()),
            stock_config_dir: None,
        };
        let cfg = PluginConfig::load_from_plugin_env(&env).expect("defaults");
        assert_eq!(cfg.listener.listen, default_listen());
    }
}
