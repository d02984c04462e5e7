//! CLI command implementations.

pub mod config;
pub mod connect;
pub mod emit;

use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;

use sio_core::config::{AppConfig, ConfigHandle};
use sio_core::error::{SioError, SioResult};
use sio_socket::{ConnectOptions, ConnectionState, SocketClient};

/// Resolve the server URL (argument > config) and build connect options.
pub async fn resolve_target(config: &ConfigHandle, url: Option<String>) -> SioResult<(String, ConnectOptions)> {
    let cfg = config.read().await;
    let url = match url {
        Some(u) => AppConfig::sanitize_server_url(&u),
        None if cfg.is_server_configured() => cfg.client.url.clone(),
        None => String::new(),
    };
    if url.is_empty() {
        return Err(SioError::MissingConfig(
            "server url. Pass it as an argument or set client.url in the config".into(),
        ));
    }
    Ok((url, ConnectOptions::from(&*cfg)))
}

/// A client whose I/O task shares the CLI's runtime.
pub fn create_client() -> SocketClient {
    SocketClient::with_runtime(Handle::current())
}

/// Parse a CLI argument as JSON, treating anything unparsable as a string.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Pump until `done` holds or the client gives up on the connection.
pub async fn wait_for<F>(client: &mut SocketClient, limit: Duration, mut done: F) -> SioResult<()>
where
    F: FnMut(&SocketClient) -> bool,
{
    let waited = tokio::time::timeout(limit, async {
        while !done(client) {
            client.pump_async().await;
            if client.status() == ConnectionState::Disconnected {
                client.pump();
                return done(client);
            }
        }
        true
    })
    .await;
    match waited {
        Ok(true) => Ok(()),
        Ok(false) => Err(SioError::NotConnected),
        Err(_) => Err(SioError::Timeout(format!("no answer within {}ms", limit.as_millis()))),
    }
}
