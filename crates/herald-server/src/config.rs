//! Server configuration.

use herald_settings::{HeartbeatSettings, HeraldSettings, SseSettings, WebSocketSettings};
use serde::{Deserialize, Serialize};

/// Runtime configuration for a [`HeraldServer`](crate::server::HeraldServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Prefix of the producer endpoints (`{api_path}/send`, `{api_path}/sendAll`).
    pub api_path: String,
    /// Name of this instance in logs and `/health`.
    pub instance_id: String,
    /// Shared bus topic every instance subscribes to.
    pub topic: String,
    /// Query parameter carrying the token when no `Authorization` header is sent.
    pub token_query_param: String,
    /// Duplex transport.
    pub websocket: WebSocketSettings,
    /// Duplex liveness.
    pub heartbeat: HeartbeatSettings,
    /// Stream transport.
    pub sse: SseSettings,
}

impl ServerConfig {
    /// Build from loaded settings.
    ///
    /// An unset instance ID gets a random one.
    pub fn from_settings(settings: &HeraldSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            api_path: settings.server.api_path.clone(),
            instance_id: settings
                .server
                .instance_id
                .clone()
                .unwrap_or_else(generate_instance_id),
            topic: settings.bus.topic.clone(),
            token_query_param: settings.auth.token_query_param.clone(),
            websocket: settings.websocket.clone(),
            heartbeat: settings.heartbeat.clone(),
            sse: settings.sse.clone(),
        }
    }

    /// `{sse.path}/close`.
    pub fn sse_close_path(&self) -> String {
        format!("{}/close", self.sse.path.trim_end_matches('/'))
    }

    /// `{api_path}/{endpoint}`.
    pub fn api_route(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.api_path.trim_end_matches('/'))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let settings = HeraldSettings::default();
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from_settings(&settings)
        }
    }
}

fn generate_instance_id() -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    format!("herald-{}", &id[id.len() - 8..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_any_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_paths() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.websocket.path, "/websocket");
        assert_eq!(cfg.sse.path, "/sse");
        assert_eq!(cfg.sse_close_path(), "/sse/close");
        assert_eq!(cfg.api_route("send"), "/push/send");
        assert_eq!(cfg.topic, "global:push");
    }

    #[test]
    fn from_settings_copies_values() {
        let mut settings = HeraldSettings::default();
        settings.server.port = 9100;
        settings.server.instance_id = Some("node-a".into());
        settings.server.api_path = "/api/".into();
        settings.heartbeat.interval_secs = 5;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.instance_id, "node-a");
        assert_eq!(cfg.api_route("sendAll"), "/api/sendAll");
        assert_eq!(cfg.heartbeat.interval_secs, 5);
    }

    #[test]
    fn generated_instance_ids_differ() {
        let a = ServerConfig::default().instance_id;
        let b = ServerConfig::default().instance_id;
        assert!(a.starts_with("herald-"));
        assert_ne!(a, b);
    }
}
