//! # herald
//!
//! Herald push server binary: serves WebSocket and SSE push connections, or
//! runs the relay hub that links a fleet of servers.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use herald_bus::{Bus, BusHub, MemoryBus, TcpBus};
use herald_settings::{BusBackend, HeraldSettings};
use herald_server::auth::{Claims, JwtIdentityResolver};
use herald_server::{HeraldServer, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Herald real-time push server.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "Herald real-time push server", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve push connections.
    Serve(ServeArgs),
    /// Run the bus relay hub shared by every server of a fleet.
    Hub {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:7400")]
        listen: String,
    },
    /// Mint a token for local testing.
    Token {
        /// Recipient key (`sub` claim).
        #[arg(long)]
        user: String,
        /// Login session (`jti` claim).
        #[arg(long)]
        session: Option<String>,
        /// Lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
        /// Settings file (default `~/.herald/settings.json`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Settings file (default `~/.herald/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Bus backend (`memory` or `tcp`).
    #[arg(long)]
    bus: Option<BusBackend>,

    /// Relay hub address for the `tcp` bus.
    #[arg(long)]
    bus_address: Option<String>,

    /// Name of this instance.
    #[arg(long)]
    instance_id: Option<String>,
}

impl ServeArgs {
    /// CLI flags override file and environment settings.
    fn apply(&self, settings: &mut HeraldSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(bus) = self.bus {
            settings.bus.backend = bus;
        }
        if let Some(address) = &self.bus_address {
            settings.bus.address.clone_from(address);
        }
        if let Some(id) = &self.instance_id {
            settings.server.instance_id = Some(id.clone());
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<HeraldSettings> {
    let path = path.cloned().unwrap_or_else(herald_settings::settings_path);
    herald_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Hub { listen } => hub(&listen).await,
        Command::Token {
            user,
            session,
            ttl_secs,
            config,
        } => token(&user, session, ttl_secs, config.as_ref()),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = load_settings(args.config.as_ref())?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    herald_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics_handle = match herald_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    let bus_cancel = CancellationToken::new();
    let bus: Arc<dyn Bus> = match settings.bus.backend {
        BusBackend::Memory => {
            info!("using in-process bus, this node is the whole fleet");
            Arc::new(MemoryBus::new())
        }
        BusBackend::Tcp => Arc::new(
            TcpBus::connect(
                settings.bus.address.clone(),
                Duration::from_millis(settings.bus.reconnect_delay_ms),
                bus_cancel.clone(),
            )
            .await
            .with_context(|| format!("Failed to connect to bus hub at {}", settings.bus.address))?,
        ),
    };

    let resolver = Arc::new(JwtIdentityResolver::new(
        &settings.auth.jwt_secret,
        Duration::from_secs(settings.auth.leeway_secs),
    ));
    let server = HeraldServer::new(ServerConfig::from_settings(&settings), bus, resolver, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    info!(%addr, backend = ?settings.bus.backend, "herald ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    server
        .coordinator()
        .graceful_shutdown(server.registry(), vec![handle], None)
        .await;
    bus_cancel.cancel();

    info!("Shutdown complete");
    Ok(())
}

async fn hub(listen: &str) -> Result<()> {
    herald_core::logging::init_subscriber("info", false);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind hub on {listen}"))?;
    let cancel = CancellationToken::new();
    let hub = BusHub::new();
    let serve_cancel = cancel.clone();
    let task = tokio::spawn(async move { hub.serve(listener, serve_cancel).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down hub...");
    cancel.cancel();
    task.await.context("Hub task panicked")?.context("Hub failed")?;
    Ok(())
}

fn token(user: &str, session: Option<String>, ttl_secs: u64, config: Option<&PathBuf>) -> Result<()> {
    let settings = load_settings(config)?;
    settings.validate().context("Invalid settings")?;

    let mut claims = Claims::new(user, Duration::from_secs(ttl_secs));
    claims.jti = session;
    let resolver = JwtIdentityResolver::new(&settings.auth.jwt_secret, Duration::ZERO);
    let token = resolver.issue(&claims).context("Failed to sign token")?;
    println!("{token}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::parse_from([
            "herald",
            "serve",
            "--port",
            "9000",
            "--bus",
            "tcp",
            "--bus-address",
            "10.0.0.5:7400",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.bus, Some(BusBackend::Tcp));
        assert_eq!(args.bus_address.as_deref(), Some("10.0.0.5:7400"));
    }

    #[test]
    fn unknown_bus_backend_rejected() {
        assert!(Cli::try_parse_from(["herald", "serve", "--bus", "redis"]).is_err());
    }

    #[test]
    fn hub_listen_defaults() {
        let cli = Cli::parse_from(["herald", "hub"]);
        assert!(matches!(cli.command, Command::Hub { ref listen } if listen == "127.0.0.1:7400"));
    }

    #[test]
    fn flags_override_settings() {
        let mut settings = HeraldSettings::default();
        let args = ServeArgs {
            host: Some("127.0.0.1".into()),
            port: Some(0),
            bus: Some(BusBackend::Tcp),
            instance_id: Some("node-9".into()),
            ..ServeArgs::default()
        };
        args.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.bus.backend, BusBackend::Tcp);
        assert_eq!(settings.bus.address, HeraldSettings::default().bus.address);
        assert_eq!(settings.server.instance_id.as_deref(), Some("node-9"));
    }

    #[test]
    fn settings_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9911}, "auth": {"jwtSecret": "s"}}"#).unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 9911);
        assert_eq!(settings.auth.jwt_secret, "s");
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
