use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level YAML document: the local CAN application's identity, logging,
/// and the named couplers/publishers the router builds at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub application: ApplicationConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
    pub couplers: Vec<CouplerConfig>,
    #[serde(default)]
    pub publishers: Vec<PublisherConfig>,
}

fn default_report_interval() -> u64 {
    30
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, crate::error::RouterError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| crate::error::RouterError::ConfigLoad {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory where log files will be stored, relative to `--working_dir`.
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Log file name prefix (date is appended by the rolling appender).
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    /// Log level (trace, debug, info, warn, error); overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_directory() -> String {
    "./logs".to_string()
}
fn default_log_prefix() -> String {
    "nmea_router".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_prefix: default_log_prefix(),
            level: default_log_level(),
        }
    }
}

/// Identity and address-pool bounds for the local CAN application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub manufacturer_id: u16,
    /// Interface whose MAC address seeds the 21-bit identity-number root.
    /// When absent or unreadable at startup, `identity_root` is used as-is.
    #[serde(default)]
    pub mac_source_interface: Option<String>,
    #[serde(default)]
    pub identity_root: u32,
    #[serde(default = "default_first_address")]
    pub first_address: u8,
    #[serde(default = "default_max_applications")]
    pub max_applications: u8,
}

fn default_first_address() -> u8 {
    128
}
fn default_max_applications() -> u8 {
    8
}

impl ApplicationConfig {
    /// Resolves the 21-bit identity number: reads `mac_source_interface`'s
    /// MAC address from sysfs and folds its NIC-specific low 3 bytes down
    /// to 21 bits, falling back to `identity_root` when no interface is
    /// configured or its address can't be read.
    pub fn resolved_identity_root(&self) -> u32 {
        let Some(iface) = &self.mac_source_interface else {
            return self.identity_root;
        };
        match std::fs::read_to_string(format!("/sys/class/net/{iface}/address")) {
            Ok(raw) => mac_to_identity_number(raw.trim()).unwrap_or(self.identity_root),
            Err(_) => self.identity_root,
        }
    }
}

fn mac_to_identity_number(mac: &str) -> Option<u32> {
    let bytes: Vec<u8> = mac
        .split(':')
        .map(|byte| u8::from_str_radix(byte, 16))
        .collect::<Result<_, _>>()
        .ok()?;
    let nic_specific = bytes.get(3..6)?;
    let value = u32::from_be_bytes([0, nic_specific[0], nic_specific[1], nic_specific[2]]);
    Some(value & 0x1F_FFFF)
}

/// Per-PGN source pinning (formerly a coupler-level gate, now a `FilterSet`
/// entry kind any publisher can attach): messages for a pinned PGN are
/// dropped as filtered unless they arrive from the expected source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceFilterConfig {
    #[serde(default)]
    pub pgn_source_map: HashMap<u32, u8>,
}

impl SourceFilterConfig {
    pub fn should_accept(&self, pgn: u32, source: u8) -> bool {
        match self.pgn_source_map.get(&pgn) {
            Some(&allowed_source) => source == allowed_source,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    ReadOnly,
    WriteOnly,
    Bidirectional,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Bidirectional
    }
}

/// Fields shared by every coupler kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplerCommon {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub convert_nmea0183: bool,
    #[serde(default)]
    pub source_filter: SourceFilterConfig,
    #[serde(default = "default_open_attempts")]
    pub max_open_attempts: u32,
    #[serde(default = "default_open_delay_seconds")]
    pub open_delay_seconds: u64,
}

fn default_open_attempts() -> u32 {
    5
}
fn default_open_delay_seconds() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CouplerConfig {
    Can {
        #[serde(flatten)]
        common: CouplerCommon,
        interface: String,
    },
    Tcp {
        #[serde(flatten)]
        common: CouplerCommon,
        host: String,
        port: u16,
        /// Accept one inbound "master" client whose lines are forwarded as
        /// if read from this coupler's own stream.
        #[serde(default)]
        accept_master: bool,
    },
    Udp {
        #[serde(flatten)]
        common: CouplerCommon,
        host: String,
        port: u16,
    },
    Serial {
        #[serde(flatten)]
        common: CouplerCommon,
        device: String,
        baud: u32,
    },
    LogReplay {
        #[serde(flatten)]
        common: CouplerCommon,
        path: String,
        #[serde(default = "default_true")]
        pacing: bool,
    },
    GrpcIngest {
        #[serde(flatten)]
        common: CouplerCommon,
        bind: String,
    },
}

fn default_true() -> bool {
    true
}

impl CouplerConfig {
    pub fn common(&self) -> &CouplerCommon {
        match self {
            CouplerConfig::Can { common, .. }
            | CouplerConfig::Tcp { common, .. }
            | CouplerConfig::Udp { common, .. }
            | CouplerConfig::Serial { common, .. }
            | CouplerConfig::LogReplay { common, .. }
            | CouplerConfig::GrpcIngest { common, .. } => common,
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }
}

/// A single filter entry: matches NMEA-2000 messages by PGN and/or source,
/// optionally imposing a minimum inter-emission period per PGN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterEntry {
    #[serde(rename = "type", default)]
    pub kind: FilterKind,
    #[serde(default)]
    pub pgns: Vec<u32>,
    #[serde(default)]
    pub sources: Vec<u8>,
    #[serde(default)]
    pub min_period_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    Select,
    Discard,
}

impl Default for FilterKind {
    fn default() -> Self {
        FilterKind::Select
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterSetConfig {
    #[serde(default)]
    pub entries: Vec<FilterEntry>,
    /// Inverts the default action taken when no entry matches a message.
    #[serde(default)]
    pub filter_select: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherCommon {
    pub name: String,
    /// Couplers this publisher attaches to; empty subscribes to all.
    #[serde(default)]
    pub couplers: Vec<String>,
    #[serde(default)]
    pub filters: FilterSetConfig,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_max_lost")]
    pub max_lost: u64,
    #[serde(default)]
    pub suspend_on_overflow: bool,
}

fn default_queue_size() -> usize {
    20
}
fn default_max_lost() -> u64 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PublisherConfig {
    TcpServer {
        #[serde(flatten)]
        common: PublisherCommon,
        bind: String,
    },
    Trace {
        #[serde(flatten)]
        common: PublisherCommon,
        path: String,
    },
    Injector {
        #[serde(flatten)]
        common: PublisherCommon,
        target_coupler: String,
    },
    /// No pack example grounds a `tonic`/`prost` stack, so this mirrors the
    /// TCP server publisher's framed-message transport rather than a
    /// literal gRPC wire format.
    Grpc {
        #[serde(flatten)]
        common: PublisherCommon,
        bind: String,
    },
}

impl PublisherConfig {
    pub fn common(&self) -> &PublisherCommon {
        match self {
            PublisherConfig::TcpServer { common, .. }
            | PublisherConfig::Trace { common, .. }
            | PublisherConfig::Injector { common, .. }
            | PublisherConfig::Grpc { common, .. } => common,
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_config_default() {
        let log_config = LogConfig::default();
        assert_eq!(log_config.directory, "./logs");
        assert_eq!(log_config.level, "info");
    }

    #[test]
    fn identity_root_falls_back_without_mac_source() {
        let app = ApplicationConfig {
            manufacturer_id: 2046,
            mac_source_interface: None,
            identity_root: 4242,
            first_address: 128,
            max_applications: 8,
        };
        assert_eq!(app.resolved_identity_root(), 4242);
    }

    #[test]
    fn mac_to_identity_number_masks_to_21_bits() {
        assert_eq!(mac_to_identity_number("00:11:22:ab:cd:ef"), Some(0x00ABCDEF_u32 & 0x1F_FFFF));
        assert_eq!(mac_to_identity_number("not-a-mac"), None);
    }

    #[test]
    fn source_filter_no_entry_accepts_all() {
        let filter = SourceFilterConfig::default();
        assert!(filter.should_accept(129025, 10));
    }

    #[test]
    fn source_filter_with_entry_pins_source() {
        let mut filter = SourceFilterConfig::default();
        filter.pgn_source_map.insert(129025, 22);
        assert!(filter.should_accept(129025, 22));
        assert!(!filter.should_accept(129025, 10));
        assert!(filter.should_accept(130312, 10));
    }

    #[test]
    fn parses_can_and_tcp_couplers_from_yaml() {
        let yaml = r#"
application:
  manufacturer_id: 2046
  first_address: 128
  max_applications: 8
couplers:
  - kind: can
    name: main_bus
    interface: can0
    convert_nmea0183: true
  - kind: tcp
    name: feed
    host: 0.0.0.0
    port: 4444
    direction: read-only
publishers:
  - kind: tcp-server
    name: clients
    bind: 0.0.0.0:10110
    queue_size: 50
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.couplers.len(), 2);
        assert_eq!(config.couplers[0].name(), "main_bus");
        match &config.couplers[1] {
            CouplerConfig::Tcp { common, port, .. } => {
                assert_eq!(common.direction, Direction::ReadOnly);
                assert_eq!(*port, 4444);
            }
            _ => panic!("expected tcp coupler"),
        }
        assert_eq!(config.publishers.len(), 1);
        assert_eq!(config.publishers[0].common().queue_size, 50);
    }

    #[test]
    fn report_interval_defaults_to_thirty_seconds() {
        let yaml = r#"
application:
  manufacturer_id: 2046
couplers: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.report_interval_seconds, 30);
    }
}
