//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file format
//! and `#[serde(default)]` so partial files deserialize cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for a Herald node.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// HTTP listener and instance identity.
    pub server: ServerSettings,
    /// Duplex (WebSocket) transport.
    pub websocket: WebSocketSettings,
    /// Duplex heartbeat policy.
    pub heartbeat: HeartbeatSettings,
    /// Stream (SSE) transport.
    pub sse: SseSettings,
    /// Shared broadcast bus.
    pub bus: BusSettings,
    /// Token validation.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Reject settings a node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret must be set".to_string(),
            ));
        }
        if self.websocket.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.sendQueueCapacity must be greater than zero".to_string(),
            ));
        }
        if self.sse.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "sse.sendQueueCapacity must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.intervalSecs must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.timeout_secs < self.heartbeat.interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat.timeoutSecs ({}) is shorter than heartbeat.intervalSecs ({})",
                self.heartbeat.timeout_secs, self.heartbeat.interval_secs
            )));
        }
        if self.bus.topic.is_empty() {
            return Err(SettingsError::InvalidValue("bus.topic must be set".to_string()));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Prefix for the producer-facing `send`/`sendAll` endpoints.
    pub api_path: String,
    /// Name of this instance in logs and health output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_path: "/push".to_string(),
            instance_id: None,
        }
    }
}

/// WebSocket transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Whether the upgrade route is mounted.
    pub enabled: bool,
    /// Upgrade route.
    pub path: String,
    /// Outbound frames buffered per connection before deliveries are dropped.
    pub send_queue_capacity: usize,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/websocket".to_string(),
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
        }
    }
}

/// Duplex heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Seconds between server pings.
    pub interval_secs: u64,
    /// Seconds without inbound activity before the connection is closed.
    pub timeout_secs: u64,
    /// Application-level probe text a client may send.
    pub probe: String,
    /// Reply sent for each application-level probe.
    pub ack: String,
}

impl HeartbeatSettings {
    /// Ping interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Idle timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 90,
            probe: "ping".to_string(),
            ack: "pong".to_string(),
        }
    }
}

/// SSE transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SseSettings {
    /// Whether the stream routes are mounted.
    pub enabled: bool,
    /// Stream route; the explicit close route is `{path}/close`.
    pub path: String,
    /// Outbound events buffered per stream before deliveries are dropped.
    pub send_queue_capacity: usize,
    /// Seconds between keep-alive comments.
    pub keep_alive_secs: u64,
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/sse".to_string(),
            send_queue_capacity: 256,
            keep_alive_secs: 15,
        }
    }
}

/// Which broadcast bus implementation a node uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process bus; a single node is the whole fleet.
    #[default]
    Memory,
    /// TCP relay hub shared by every node.
    Tcp,
}

impl std::str::FromStr for BusBackend {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "tcp" => Ok(Self::Tcp),
            other => Err(SettingsError::InvalidValue(format!(
                "unknown bus backend '{other}'"
            ))),
        }
    }
}

/// Shared broadcast bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Bus implementation.
    pub backend: BusBackend,
    /// Hub address for the TCP backend.
    pub address: String,
    /// Topic every instance subscribes to.
    pub topic: String,
    /// Delay between hub reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            address: "127.0.0.1:7400".to_string(),
            topic: "global:push".to_string(),
            reconnect_delay_ms: 1000,
        }
    }
}

/// Token validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret.
    pub jwt_secret: String,
    /// Query parameter carrying the token when no `Authorization` header is sent.
    pub token_query_param: String,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_query_param: "token".to_string(),
            leeway_secs: 30,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
