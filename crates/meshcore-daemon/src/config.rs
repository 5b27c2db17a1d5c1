//! Daemon configuration file management.
//!
//! TOML with serde defaults for every field, loaded from
//! `$MESHCORE_DATA_DIR/config.toml` (or the platform default directory).
//! A missing file means defaults; a malformed file is a startup error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Node identity and role.
    #[serde(default)]
    pub node: NodeSection,
    /// Self-announcement cadence.
    #[serde(default)]
    pub advert: AdvertSection,
    /// Forwarding policy and regions.
    #[serde(default)]
    pub radio: RadioSection,
    /// MQTT bridge settings.
    #[serde(default)]
    pub mqtt: MqttSection,
    /// Room server settings; ignored unless the node type is `room`.
    #[serde(default)]
    pub room: RoomSection,
    /// Logging and data directory.
    #[serde(default)]
    pub advanced: AdvancedSection,
}

/// Node identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Advertised node name.
    #[serde(default = "default_node_name")]
    pub name: String,
    /// Node role: "chat" | "repeater" | "room" | "sensor".
    #[serde(default = "default_node_type")]
    pub node_type: String,
    /// Hex-encoded 32-byte Ed25519 seed. Empty = generate at startup.
    #[serde(default)]
    pub identity_seed: String,
    /// Advertised latitude × 1e6; meaningful only with `has_location`.
    #[serde(default)]
    pub lat: i32,
    /// Advertised longitude × 1e6; meaningful only with `has_location`.
    #[serde(default)]
    pub lon: i32,
    /// Whether to advertise the configured position.
    #[serde(default)]
    pub has_location: bool,
}

/// Self-announcement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertSection {
    /// Zero-hop advert interval in 2-minute units; 0 disables.
    #[serde(default = "default_local_units")]
    pub local_interval_units: u32,
    /// Flood advert interval in hours; 0 disables.
    #[serde(default = "default_flood_hours")]
    pub flood_interval_hours: u32,
}

/// Forwarding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioSection {
    /// Whether this node relays other nodes' packets.
    #[serde(default = "default_true")]
    pub forwarding: bool,
    /// Flood hop limit.
    #[serde(default = "default_max_flood_hops")]
    pub max_flood_hops: u8,
    /// Region names for transport-code validation; empty = accept all.
    #[serde(default)]
    pub regions: Vec<String>,
}

/// MQTT bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSection {
    /// Whether the MQTT bridge is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Broker URL.
    #[serde(default)]
    pub broker_url: String,
    /// Optional username.
    #[serde(default)]
    pub username: String,
    /// Optional password.
    #[serde(default)]
    pub password: String,
    /// Connect over TLS.
    #[serde(default)]
    pub tls: bool,
    /// Topic prefix.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Mesh identifier appended to the topic prefix.
    #[serde(default = "default_mesh_id")]
    pub mesh_id: String,
}

/// Room server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSection {
    /// Admin password; empty disables admin logins.
    #[serde(default)]
    pub admin_password: String,
    /// Guest (read-write) password; empty disables guest logins.
    #[serde(default)]
    pub guest_password: String,
    /// Accept passwordless logins as read-only clients.
    #[serde(default = "default_true")]
    pub allow_read_only: bool,
    /// Client session capacity.
    #[serde(default = "default_client_capacity")]
    pub client_capacity: usize,
    /// Post ring capacity.
    #[serde(default = "default_post_capacity")]
    pub post_capacity: usize,
}

/// Logging and storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedSection {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

// Default value functions

fn default_node_name() -> String {
    "MeshCore Node".to_string()
}

fn default_node_type() -> String {
    "chat".to_string()
}

fn default_local_units() -> u32 {
    1
}

fn default_flood_hours() -> u32 {
    12
}

fn default_true() -> bool {
    true
}

fn default_max_flood_hops() -> u8 {
    64
}

fn default_topic_prefix() -> String {
    "meshcore".to_string()
}

fn default_mesh_id() -> String {
    "public".to_string()
}

fn default_client_capacity() -> usize {
    64
}

fn default_post_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            node_type: default_node_type(),
            identity_seed: String::new(),
            lat: 0,
            lon: 0,
            has_location: false,
        }
    }
}

impl Default for AdvertSection {
    fn default() -> Self {
        Self {
            local_interval_units: default_local_units(),
            flood_interval_hours: default_flood_hours(),
        }
    }
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            forwarding: true,
            max_flood_hops: default_max_flood_hops(),
            regions: Vec::new(),
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: String::new(),
            username: String::new(),
            password: String::new(),
            tls: false,
            topic_prefix: default_topic_prefix(),
            mesh_id: default_mesh_id(),
        }
    }
}

impl Default for RoomSection {
    fn default() -> Self {
        Self {
            admin_password: String::new(),
            guest_password: String::new(),
            allow_read_only: true,
            client_capacity: default_client_capacity(),
            post_capacity: default_post_capacity(),
        }
    }
}

impl Default for AdvancedSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: String::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// The data directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.advanced.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.advanced.data_dir)
        }
    }

    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("MESHCORE_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("MESHCORE_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".meshcore"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/meshcore"))
    }
}
