//! Protocol and application-wide constants.

/// Application name, used for platform directories and log file names.
pub const APP_NAME: &str = "sio-client";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine.IO protocol revision spoken by the client.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Default Socket.IO resource path on the server.
pub const DEFAULT_PATH: &str = "socket.io";

/// The default namespace, implicitly joined on every connection.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Ping interval assumed when the handshake omits one (milliseconds).
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;

/// Ping timeout assumed when the handshake omits one (milliseconds).
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

/// Time allowed for transport setup plus the Engine.IO open packet (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Time allowed for the transport to acknowledge a local close (milliseconds).
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 3_000;

/// Default deadline for an acknowledgement (milliseconds).
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 20_000;

/// Default capacity of the per-namespace queue of emits awaiting a join.
pub const DEFAULT_PENDING_QUEUE_CAPACITY: usize = 64;

/// Reconnection backoff defaults.
pub mod reconnect {
    /// First reconnection delay (milliseconds).
    pub const DELAY_MS: u64 = 5_000;
    /// Upper bound for the reconnection delay (milliseconds).
    pub const DELAY_MAX_MS: u64 = 25_000;
    /// Growth factor applied per attempt.
    pub const MULTIPLIER: f64 = 1.5;
    /// Randomization applied to each delay, as a fraction of the delay.
    pub const JITTER: f64 = 0.5;
}
