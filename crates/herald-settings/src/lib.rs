//! # herald-settings
//!
//! Layered configuration for the Herald push subsystem.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **Settings file**: `~/.herald/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HERALD_*` overrides (highest priority)
//!
//! Command-line flags are applied by the binary on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_values() {
        let settings = HeraldSettings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.api_path, "/push");
        assert_eq!(settings.websocket.path, "/websocket");
        assert_eq!(settings.sse.path, "/sse");
        assert_eq!(settings.heartbeat.interval_secs, 30);
        assert_eq!(settings.heartbeat.timeout_secs, 90);
        assert_eq!(settings.bus.backend, BusBackend::Memory);
        assert_eq!(settings.bus.topic, "global:push");
        assert_eq!(settings.auth.token_query_param, "token");
        assert_eq!(settings.logging.level, "info");
    }
}
