//! Server configuration: command line, environment and defaults.
//!
//! Every flag can also be set through a `PARTYHALL_*` variable, and the
//! binary loads a `.env` file before parsing, so a deployment can keep its
//! settings out of the command line.

use std::time::Duration;

use clap::Parser;
use partyhall_room::RegistryConfig;
use partyhall_session::SessionConfig;
use rand::Rng;

/// How long a signed session token stays valid.
const SESSION_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Command-line arguments for the partyhall server.
#[derive(Parser, Debug, Clone)]
#[command(name = "partyhall", version, about = "Party-game lobby server")]
pub struct Cli {
    /// Interface to listen on.
    #[arg(long, env = "PARTYHALL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "PARTYHALL_PORT", default_value_t = 8765)]
    pub port: u16,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, env = "PARTYHALL_DEBUG")]
    pub debug: bool,

    /// Secret used to sign session tokens. A random one is generated when
    /// unset, so tokens do not survive a restart.
    #[arg(long, env = "PARTYHALL_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Passed through for deployments that keep accounts elsewhere.
    /// The server itself stores nothing.
    #[arg(long, env = "PARTYHALL_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Seconds between liveness checks on each connection.
    #[arg(long, env = "PARTYHALL_HEARTBEAT_INTERVAL", default_value_t = 30)]
    pub heartbeat_interval: u64,

    /// Seconds of silence after which a connection is dropped.
    #[arg(long, env = "PARTYHALL_HEARTBEAT_TIMEOUT", default_value_t = 90)]
    pub heartbeat_timeout: u64,

    /// Seconds a dropped player's seat and session are held.
    #[arg(long, env = "PARTYHALL_RECONNECT_GRACE", default_value_t = 30)]
    pub reconnect_grace: u64,

    #[arg(long, env = "PARTYHALL_MAX_ROOMS", default_value_t = 1000)]
    pub max_rooms: usize,

    /// Let players in by name without a session token.
    #[arg(
        long,
        env = "PARTYHALL_ALLOW_GUESTS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub allow_guests: bool,
}

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub session_secret: String,
    pub token_ttl: Duration,
    pub allow_guests: bool,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub database_url: Option<String>,
    pub session: SessionConfig,
    pub registry: RegistryConfig,
}

impl ServerConfig {
    /// Sets the reconnect grace for both sessions and held seats.
    pub fn with_reconnect_grace(mut self, grace: Duration) -> Self {
        self.session.reconnect_grace = grace;
        self.registry.reconnect_grace = grace;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let registry = RegistryConfig::default();
        Self {
            bind_addr: "0.0.0.0:8765".to_string(),
            session_secret: random_secret(),
            token_ttl: SESSION_TOKEN_TTL,
            allow_guests: true,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            database_url: None,
            session: SessionConfig {
                reconnect_grace: registry.reconnect_grace,
            },
            registry,
        }
    }
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        let session_secret = cli.session_secret.unwrap_or_else(|| {
            tracing::warn!("no session secret configured, generated a random one");
            random_secret()
        });
        let grace = Duration::from_secs(cli.reconnect_grace);

        Self {
            bind_addr: format!("{}:{}", cli.host, cli.port),
            session_secret,
            token_ttl: SESSION_TOKEN_TTL,
            allow_guests: cli.allow_guests,
            heartbeat_interval: Duration::from_secs(cli.heartbeat_interval.max(1)),
            heartbeat_timeout: Duration::from_secs(cli.heartbeat_timeout),
            database_url: cli.database_url,
            session: SessionConfig::default(),
            registry: RegistryConfig {
                max_rooms: cli.max_rooms,
                ..RegistryConfig::default()
            },
        }
        .with_reconnect_grace(grace)
    }
}

fn random_secret() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_match_documented_values() {
        let cli = Cli::try_parse_from(["partyhall"]).unwrap();

        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 8765);
        assert!(!cli.debug);
        assert_eq!(cli.heartbeat_interval, 30);
        assert_eq!(cli.heartbeat_timeout, 90);
        assert_eq!(cli.reconnect_grace, 30);
        assert_eq!(cli.max_rooms, 1000);
        assert!(cli.allow_guests);
    }

    #[test]
    fn test_server_config_from_cli_carries_every_setting() {
        let cli = Cli::try_parse_from([
            "partyhall",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--session-secret",
            "hunter2",
            "--reconnect-grace",
            "5",
            "--max-rooms",
            "3",
            "--allow-guests",
            "false",
        ])
        .unwrap();

        let config = ServerConfig::from(cli);

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.session_secret, "hunter2");
        assert_eq!(config.session.reconnect_grace, Duration::from_secs(5));
        assert_eq!(config.registry.reconnect_grace, Duration::from_secs(5));
        assert_eq!(config.registry.max_rooms, 3);
        assert!(!config.allow_guests);
    }

    #[test]
    fn test_server_config_without_secret_generates_one() {
        let a = ServerConfig::from(Cli::try_parse_from(["partyhall"]).unwrap());
        let b = ServerConfig::from(Cli::try_parse_from(["partyhall"]).unwrap());

        assert_eq!(a.session_secret.len(), 64);
        assert_ne!(a.session_secret, b.session_secret);
    }
}
