//! sio - command-line Socket.IO client.
//!
//! Connects to a Socket.IO v4 server to watch events, emit one-off events
//! (optionally waiting for the acknowledgement) and manage the config file.

mod commands;

use clap::{Parser, Subcommand};
use tracing::info;

use sio_core::config::{AppConfig, ConfigHandle};
use sio_core::error::SioResult;
use sio_core::logging;
use sio_core::platform::Platform;

/// Socket.IO client for the terminal.
#[derive(Parser)]
#[command(
    name = "sio",
    version,
    about = "Socket.IO v4 client CLI",
    long_about = "A command-line Socket.IO client.\n\
                   Join namespaces, print incoming events and emit events with acknowledgements."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, join namespaces and print events until Ctrl+C.
    Connect {
        /// Server URL (overrides config).
        url: Option<String>,
        /// Extra namespace to join; repeatable.
        #[arg(short, long = "namespace")]
        namespaces: Vec<String>,
        /// Event to print; repeatable. Prints "message" when omitted.
        #[arg(short, long = "event")]
        events: Vec<String>,
        /// JSON auth payload sent with every namespace connect.
        #[arg(short, long)]
        auth: Option<String>,
    },
    /// Connect, emit a single event and disconnect.
    Emit {
        /// Event name.
        event: String,
        /// Event arguments; each is parsed as JSON, falling back to a string.
        args: Vec<String>,
        /// Server URL (overrides config).
        #[arg(short, long)]
        url: Option<String>,
        /// Namespace to emit on.
        #[arg(short, long, default_value = "/")]
        namespace: String,
        /// Wait for the server's acknowledgement and print it.
        #[arg(long)]
        ack: bool,
        /// Acknowledgement timeout in milliseconds (overrides config).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> SioResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let (config_path, config) = match cli.config.as_deref() {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let config = if path.exists() {
                AppConfig::load_from_file(&path)?
            } else {
                AppConfig::default()
            };
            (path, config)
        }
        None => (AppConfig::default_config_path()?, AppConfig::load_default()?),
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let _guard = match config.effective_log_dir() {
        Ok(log_dir) => Some(logging::init_logging(&log_level, &log_dir, config.logging.json_output)?),
        Err(_) => {
            logging::init_console_logging(&log_level);
            None
        }
    };

    let config_handle = ConfigHandle::new(config);

    info!("sio CLI v{} on {}", sio_core::constants::APP_VERSION, Platform::current());

    match cli.command {
        Commands::Connect {
            url,
            namespaces,
            events,
            auth,
        } => commands::connect::run(config_handle, url, namespaces, events, auth, cli.format).await,
        Commands::Emit {
            event,
            args,
            url,
            namespace,
            ack,
            timeout_ms,
        } => {
            let request = commands::emit::EmitArgs {
                event,
                args,
                namespace,
                ack,
                timeout_ms,
            };
            commands::emit::run(config_handle, url, request, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
