//! Emit command - connect, emit one event and disconnect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use console::style;
use serde_json::json;
use tracing::{info, warn};

use sio_core::config::ConfigHandle;
use sio_core::error::{SioError, SioResult};
use sio_socket::{AckError, ConnectionState, Payload};

use crate::OutputFormat;

/// What to emit.
pub struct EmitArgs {
    pub event: String,
    pub args: Vec<String>,
    pub namespace: String,
    pub ack: bool,
    pub timeout_ms: Option<u64>,
}

type AckSlot = Arc<Mutex<Option<Result<Payload, AckError>>>>;

/// Run the emit command.
pub async fn run(config: ConfigHandle, url: Option<String>, request: EmitArgs, format: OutputFormat) -> SioResult<()> {
    let (url, options) = super::resolve_target(&config, url).await?;
    let connect_timeout = options.connect_timeout;
    let close_timeout = options.close_timeout;
    let ack_timeout = request
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(options.ack_timeout);
    let payload = Payload::from(request.args.iter().map(|a| super::parse_arg(a)).collect::<Vec<_>>());

    let mut client = super::create_client();
    client.connect(&url, options).map_err(SioError::from)?;
    client.join(&request.namespace).map_err(SioError::from)?;
    super::wait_for(&mut client, connect_timeout, |c| c.is_joined(&request.namespace)).await?;
    info!("connected to {url} as {}", client.sid().unwrap_or("?"));

    let result = if request.ack {
        let slot: AckSlot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        client
            .emit_with_ack(&request.namespace, &request.event, payload, Some(ack_timeout), move |result| {
                if let Ok(mut guard) = sink.lock() {
                    *guard = Some(result);
                }
            })
            .map_err(SioError::from)?;
        // The engine enforces the deadline; the outer limit only guards a lost session.
        super::wait_for(&mut client, ack_timeout + Duration::from_secs(1), |_| {
            slot.lock().map(|g| g.is_some()).unwrap_or(true)
        })
        .await?;
        let settled = slot.lock().ok().and_then(|mut g| g.take());
        match settled {
            Some(Ok(reply)) => {
                print_reply(&request.event, &reply, format);
                Ok(())
            }
            Some(Err(e)) => Err(SioError::Socket(format!("{} was not acknowledged: {e}", request.event))),
            None => Err(SioError::Internal("ack slot poisoned".into())),
        }
    } else {
        client
            .emit(&request.namespace, &request.event, payload)
            .map_err(SioError::from)?;
        if let OutputFormat::Text = format {
            println!("  {} Emitted {}", style("OK").green().bold(), request.event);
        }
        Ok(())
    };

    client.disconnect();
    let closed = super::wait_for(&mut client, close_timeout + Duration::from_secs(1), |c| {
        c.status() == ConnectionState::Disconnected
    })
    .await;
    if let Err(e) = closed {
        warn!("disconnect did not complete cleanly: {e}");
    }
    result
}

fn print_reply(event: &str, reply: &Payload, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            println!(
                "  {} {event} acknowledged: {}",
                style("OK").green().bold(),
                reply.to_value()
            );
        }
        OutputFormat::Json => {
            println!("{}", json!({ "event": event, "ack": reply.to_value() }));
        }
    }
}
