//! Server and zone options, deserialised from YAML.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

use crate::acl::AclEntry;
use crate::name::Name;
use crate::zone::ZoneOptions;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Answer to `id.server.` / `hostname.bind.` CH TXT queries.
    pub identity: String,
    /// Answer to `version.server.` / `version.bind.` CH TXT queries.
    pub version: String,
    /// The serialised snapshot the database loads from.
    pub database: PathBuf,
    /// The differential update log.
    pub difffile: PathBuf,
    pub ipv4_edns_size: u16,
    pub ipv6_edns_size: u16,
    /// True when the sockets set IPV6_USE_MIN_MTU themselves; otherwise
    /// IPv6 UDP answers are capped at 1280 bytes.
    pub ipv6_use_min_mtu: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            identity: "unidentified server".into(),
            version: concat!("zonecut ", env!("CARGO_PKG_VERSION")).into(),
            database: PathBuf::from("zonecut.db"),
            difffile: PathBuf::from("ixfr.db"),
            ipv4_edns_size: 4096,
            ipv6_edns_size: 4096,
            ipv6_use_min_mtu: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default)]
    pub acl: Vec<AclEntry>,
    /// Keep applied deltas around for answering IXFR.
    #[serde(default = "default_true")]
    pub store_ixfr: bool,
    /// Upstream masters, consumed by the external transfer client.
    #[serde(default)]
    pub request_xfr: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl ZoneConfig {
    pub fn apex(&self) -> anyhow::Result<Name> {
        self.name
            .parse()
            .with_context(|| format!("bad zone name '{}'", self.name))
    }

    pub fn zone_options(&self) -> ZoneOptions {
        ZoneOptions {
            acl: self.acl.clone(),
            store_ixfr: self.store_ixfr,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub options: ServerOptions,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl Config {
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Config> {
        serde_yaml::from_slice(bytes).context("failed to parse configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let yaml = br#"
options:
  identity: ns1.example.net
  ipv4_edns_size: 1432
zones:
  - name: example.com
    acl:
      - action: provide_xfr
        address: 192.0.2.7
    request_xfr:
      - 192.0.2.1
  - name: example.org
"#;
        let config = Config::from_bytes(yaml).unwrap();
        assert_eq!(config.options.identity, "ns1.example.net");
        assert_eq!(config.options.ipv4_edns_size, 1432);
        assert_eq!(config.options.ipv6_edns_size, 4096);
        assert_eq!(config.zones.len(), 2);
        assert_eq!(config.zones[0].acl.len(), 1);
        assert!(config.zones[0].store_ixfr);
        assert_eq!(
            config.zones[0].apex().unwrap(),
            "example.com.".parse().unwrap()
        );
    }

    #[test]
    fn empty_config_gets_defaults() {
        let config = Config::from_bytes(b"{}").unwrap();
        assert!(config.zones.is_empty());
        assert_eq!(config.options.ipv4_edns_size, 4096);
        assert!(!config.options.ipv6_use_min_mtu);
    }
}
