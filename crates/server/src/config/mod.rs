use std::{fs::read_to_string, net::SocketAddr, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::consts::{
    DEFAULT_DB_IDLE_TRANSACTION_SECS, DEFAULT_DB_MAX_ROWS, DEFAULT_LISTEN_PORT,
    DEFAULT_RETENTION_BYTES, DEFAULT_RETENTION_MESSAGES,
};
use shared::consts::DEFAULT_MAX_WS_PAYLOAD_SIZE;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    // Groups added to every queue lacking an explicit group list
    pub default_groups: Vec<String>,
    pub queues: Vec<QueueConfig>,
    pub interface: InterfaceConfig,
    pub http: HttpConfig,
    pub db: DbConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    pub name: String,
    pub groups: Vec<String>,
    pub acl: Vec<String>,
    pub max_payload_size: usize,
    pub message_processors: Vec<String>,
    pub retention_messages: usize,
    pub retention_bytes: usize,
    pub dbstore: DbStoreConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            name: String::new(),
            groups: Vec::new(),
            acl: Vec::new(),
            max_payload_size: DEFAULT_MAX_WS_PAYLOAD_SIZE,
            message_processors: Vec::new(),
            retention_messages: DEFAULT_RETENTION_MESSAGES,
            retention_bytes: DEFAULT_RETENTION_BYTES,
            dbstore: DbStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct DbStoreConfig {
    pub driver: String,
    pub parameters: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterfaceConfig {
    // "[ip:]port"; empty disables the plain listener
    pub bind: String,
    pub acl: Vec<String>,
    pub socket_port_reuse: bool,
    pub ssl: SslConfig,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        InterfaceConfig {
            bind: DEFAULT_LISTEN_PORT.to_string(),
            acl: Vec::new(),
            socket_port_reuse: true,
            ssl: SslConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SslConfig {
    // Empty bind disables the TLS listener
    pub bind: String,
    pub acl: Vec<String>,
    pub socket_port_reuse: bool,
    pub key: String,
    pub certificate: String,
    pub verify_peer: bool,
    // Root certificates accepted for client authentication; required
    // when verifyPeer is set
    pub client_authority: String,
}

impl Default for SslConfig {
    fn default() -> Self {
        SslConfig {
            bind: String::new(),
            acl: Vec::new(),
            socket_port_reuse: true,
            key: String::new(),
            certificate: String::new(),
            verify_peer: false,
            client_authority: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpConfig {
    // Empty filebase disables static file serving
    pub filebase: String,
    pub static_path: String,
    pub broker_path: String,
    pub db_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            filebase: String::new(),
            static_path: "/".to_string(),
            broker_path: "/".to_string(),
            db_path: "/db/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DbConfig {
    pub idle_transaction_timeout: u64,
    pub max_rows_per_query: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            idle_transaction_timeout: DEFAULT_DB_IDLE_TRANSACTION_SECS,
            max_rows_per_query: DEFAULT_DB_MAX_ROWS,
        }
    }
}

impl Config {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let toml_str = read_to_string(path)
            .with_context(|| format!("cannot read configuration file {:?}", path))?;
        let mut config = Config::from_toml_str(&toml_str)
            .with_context(|| format!("cannot parse configuration file {:?}", path))?;
        config.apply_default_groups();
        Ok(config)
    }

    /// Queues without an explicit group list inherit `defaultGroups`.
    pub fn apply_default_groups(&mut self) {
        for queue in &mut self.queues {
            if queue.groups.is_empty() {
                queue.groups = self.default_groups.clone();
            }
        }
    }

    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn listen_sockaddr(&self) -> Result<Option<SocketAddr>> {
        parse_bind(&self.interface.bind)
    }

    pub fn ssl_listen_sockaddr(&self) -> Result<Option<SocketAddr>> {
        parse_bind(&self.interface.ssl.bind)
    }
}

/// Parses "[ip:]port". A bare port binds all interfaces; empty means no
/// listener.
pub fn parse_bind(bind: &str) -> Result<Option<SocketAddr>> {
    let bind = bind.trim();
    if bind.is_empty() {
        return Ok(None);
    }
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(Some(SocketAddr::from(([0, 0, 0, 0], port))));
    }
    bind.parse::<SocketAddr>()
        .map(Some)
        .map_err(|_| anyhow::anyhow!("invalid bind address: {:?}", bind))
}
