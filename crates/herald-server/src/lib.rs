//! # herald-server
//!
//! Real-time push delivery for one instance of a fleet:
//!
//! - [`push`]: connection handles, the registry, the fan-out router and lifecycle hooks
//! - [`websocket`]: duplex transport with heartbeats
//! - [`sse`]: push-only event streams
//! - [`server`]: HTTP surface (`/health`, `/metrics`, producer endpoints, upgrades)
//! - [`auth`]: token-based identity resolution
//! - [`shutdown`]: graceful shutdown

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod http;
pub mod metrics;
pub mod push;
pub mod server;
pub mod shutdown;
pub mod sse;
pub mod websocket;

pub use config::ServerConfig;
pub use server::HeraldServer;
