// Application configuration
//
// JSON file, every section optional. Path comes from the first CLI argument
// or FT8ALERT_CONFIG; without either the defaults below are used.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bands::is_known_band;
use crate::error::ConfigError;
use crate::udp::ListenerConfig;
use crate::watchlist::{BandWatch, ALL_BANDS};

pub const CONFIG_ENV: &str = "FT8ALERT_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub udp: UdpConfig,
    pub reference: ReferenceConfig,
    pub reply: ReplyConfig,
    /// Band name ("20m", "40m", ... or "all") -> lists
    pub watch: HashMap<String, BandWatch>,
    pub worked_before: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub address: String,
    pub port: u16,
    pub interface: String,
    /// Our id in heartbeats sent back to WSJT-X
    pub client_id: String,
    pub recv_timeout_ms: u64,
    pub rebind_interval_secs: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 2237,
            interface: "0.0.0.0".to_string(),
            client_id: "FT8ALERT".to_string(),
            recv_timeout_ms: 1000,
            rebind_interval_secs: 5,
        }
    }
}

impl UdpConfig {
    pub fn listener_config(&self) -> Result<ListenerConfig, ConfigError> {
        let address: IpAddr = self
            .address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.address.clone()))?;
        let interface: Ipv4Addr = self
            .interface
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.interface.clone()))?;

        Ok(ListenerConfig {
            address,
            port: self.port,
            interface,
            recv_timeout: Duration::from_millis(self.recv_timeout_ms.max(1)),
            rebind_interval: Duration::from_secs(self.rebind_interval_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Club Log cty.xml
    pub cty_xml: Option<PathBuf>,
    /// CQ zone polygons (GeoJSON)
    pub cq_zones: Option<PathBuf>,
    pub cache_file: Option<PathBuf>,
    pub cache_capacity: usize,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            cty_xml: None,
            cq_zones: None,
            cache_file: None,
            cache_capacity: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    pub auto_reply: bool,
    pub max_attempts: u32,
    pub cooldown_secs: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            auto_reply: false,
            max_attempts: 3,
            cooldown_secs: 600,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        for band in config.watch.keys() {
            if band != ALL_BANDS && !is_known_band(band) {
                log::warn!("Watch list for unknown band {:?} will never match", band);
            }
        }
        Ok(config)
    }

    /// Config file path from the command line or environment
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.udp.port, 2237);
        assert_eq!(config.reference.cache_capacity, 5000);
        assert!(!config.reply.auto_reply);

        let listener = config.udp.listener_config().unwrap();
        assert_eq!(listener.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(listener.recv_timeout, Duration::from_secs(1));
        assert!(!listener.is_multicast());
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "udp": { "address": "224.0.0.1", "port": 2238 },
            "reference": { "cty_xml": "/data/cty.xml", "cache_capacity": 100 },
            "reply": { "auto_reply": true, "max_attempts": 5 },
            "watch": {
                "all": { "wanted": ["VK*", "ZL*"] },
                "20m": { "excluded": ["F5*"], "monitored_zones": [14, 15] }
            },
            "worked_before": ["F4ABC"]
        }"#;
        let config = Config::from_json(json).unwrap();

        assert_eq!(config.udp.client_id, "FT8ALERT");
        assert!(config.udp.listener_config().unwrap().is_multicast());
        assert_eq!(config.reference.cty_xml, Some(PathBuf::from("/data/cty.xml")));
        assert_eq!(config.reply.cooldown_secs, 600);
        assert_eq!(config.reply.max_attempts, 5);
        assert_eq!(config.watch["all"].wanted, vec!["VK*", "ZL*"]);
        assert!(config.watch["20m"].monitored_zones.contains(&15));
        assert_eq!(config.worked_before, vec!["F4ABC"]);
    }

    #[test]
    fn test_bad_config() {
        assert!(matches!(Config::from_json("{"), Err(ConfigError::Json(_))));

        let mut udp = UdpConfig::default();
        udp.address = "localhost:2237".to_string();
        assert!(matches!(udp.listener_config(), Err(ConfigError::InvalidAddress(_))));
    }
}
