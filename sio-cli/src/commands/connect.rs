//! Connect command - join namespaces and print events until Ctrl+C.

use std::time::Duration;

use console::style;
use serde_json::json;
use tracing::warn;

use sio_core::config::ConfigHandle;
use sio_core::error::{SioError, SioResult};
use sio_socket::{ClientEvent, ConnectionState, Event};

use crate::OutputFormat;

/// Run the connect command.
pub async fn run(
    config: ConfigHandle,
    url: Option<String>,
    namespaces: Vec<String>,
    events: Vec<String>,
    auth: Option<String>,
    format: OutputFormat,
) -> SioResult<()> {
    let (url, mut options) = super::resolve_target(&config, url).await?;
    for namespace in namespaces {
        if !options.namespaces.contains(&namespace) {
            options.namespaces.push(namespace);
        }
    }
    if let Some(raw) = auth {
        options.auth = Some(serde_json::from_str(&raw)?);
    }
    let events = if events.is_empty() {
        vec!["message".to_string()]
    } else {
        events
    };
    let close_timeout = options.close_timeout;

    let mut client = super::create_client();
    client.on_lifecycle(move |event| print_lifecycle(event, format));

    let mut watched = vec!["/".to_string()];
    watched.extend(options.namespaces.iter().cloned());
    for namespace in &watched {
        for name in &events {
            client
                .on(namespace, name, move |event| {
                    print_event(event, format);
                    Ok(())
                })
                .map_err(SioError::from)?;
        }
    }

    if let OutputFormat::Text = format {
        println!("{} Connecting to {url}...", style("[1/2]").bold().dim());
    }
    client.connect(&url, options).map_err(SioError::from)?;

    if let OutputFormat::Text = format {
        println!(
            "{} Listening for {} (Ctrl+C to stop)",
            style("[2/2]").bold().dim(),
            events.join(", ")
        );
        println!();
    }

    loop {
        tokio::select! {
            _ = client.pump_async() => {
                if client.status() == ConnectionState::Disconnected {
                    client.pump();
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let OutputFormat::Text = format {
                    println!("\n  Disconnecting...");
                }
                client.disconnect();
                let closed = super::wait_for(&mut client, close_timeout + Duration::from_secs(1), |c| {
                    c.status() == ConnectionState::Disconnected
                })
                .await;
                if let Err(e) = closed {
                    warn!("disconnect did not complete cleanly: {e}");
                }
                break;
            }
        }
    }

    Ok(())
}

fn print_event(event: &Event, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            let args: Vec<String> = event
                .payload
                .args
                .iter()
                .map(|arg| match event.payload.resolve(arg) {
                    Some(bytes) => format!("<{} bytes>", bytes.len()),
                    None => arg.to_string(),
                })
                .collect();
            println!(
                "  {} {} {}",
                style(format!("[{}]", event.namespace)).dim(),
                style(&event.name).cyan(),
                args.join(" ")
            );
        }
        OutputFormat::Json => {
            let line = json!({
                "namespace": event.namespace,
                "event": event.name,
                "args": event.payload.to_value(),
                "attachments": event.payload.attachments.len(),
            });
            println!("{line}");
        }
    }
}

fn print_lifecycle(event: &ClientEvent, format: OutputFormat) {
    let detail = match event {
        ClientEvent::Connect { namespace } => format!("joined {namespace}"),
        ClientEvent::Reconnecting { attempt, delay } => {
            format!("attempt {attempt} in {}ms", delay.as_millis())
        }
        ClientEvent::Disconnect { reason } => reason.to_string(),
        ClientEvent::ConnectError { namespace, data } => format!("{namespace} refused: {data}"),
        ClientEvent::NamespaceDisconnect { namespace } => format!("server left {namespace}"),
        ClientEvent::Backpressure { namespace, dropped } => {
            format!("{namespace} dropped {dropped} queued emit(s)")
        }
    };

    match format {
        OutputFormat::Text => {
            let tag = format!("[{}]", event.name());
            let tag = match event {
                ClientEvent::Connect { .. } => style(tag).green().bold(),
                ClientEvent::Disconnect { .. } | ClientEvent::ConnectError { .. } => style(tag).red().bold(),
                _ => style(tag).yellow(),
            };
            println!("  {tag} {detail}");
        }
        OutputFormat::Json => {
            println!("{}", json!({ "lifecycle": event.name(), "detail": detail }));
        }
    }
}
