use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse log level from a string, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `log_mode`.
pub fn init_logger(log_mode: &str) {
    let filter = if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        env_filter
    } else {
        let level = LogLevel::parse(log_mode).unwrap_or_default();
        EnvFilter::new(format!("mtproto_proxy={}", level.as_str()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(true)
                .with_ansi(true)
                .compact(),
        )
        .init();
}

pub mod log {
    pub use tracing::{debug, error, info, trace, warn};

    use std::net::SocketAddr;
    use uuid::Uuid;

    /// Session accepted
    pub fn session_started(secret: &str, peer: &SocketAddr, socket_id: &Uuid) {
        debug!(secret = secret, peer = %peer, socket_id = %socket_id, "Client connected");
    }

    /// Session torn down
    pub fn session_ended(peer: &SocketAddr, socket_id: &Uuid, up: u64, down: u64) {
        debug!(
            peer = %peer,
            socket_id = %socket_id,
            up = up,
            down = down,
            "Client disconnected"
        );
    }

    /// Client or backend handshake could not be completed
    pub fn handshake_failed(side: &str, peer: &SocketAddr, socket_id: &Uuid, error: &str) {
        warn!(
            side = side,
            peer = %peer,
            socket_id = %socket_id,
            error = error,
            "Cannot initialize {} connection",
            side
        );
    }
}
