//! Config commands.

use std::path::Path;

use clap::Subcommand;
use console::style;

use sio_core::config::{AppConfig, ConfigHandle};
use sio_core::error::{SioError, SioResult};

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Print the configuration file path.
    Path,
    /// Write a default configuration file.
    Init {
        /// Server URL to store in the new file.
        #[arg(short, long)]
        url: Option<String>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub async fn run(config: ConfigHandle, path: &Path, action: ConfigAction, format: OutputFormat) -> SioResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.read().await;
            match format {
                OutputFormat::Text => {
                    let rendered = toml::to_string_pretty(&*cfg)
                        .map_err(|e| SioError::Config(format!("failed to render config: {e}")))?;
                    println!("{rendered}");
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*cfg)?),
            }
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init { url, force } => {
            if path.exists() && !force {
                return Err(SioError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            let mut fresh = AppConfig::default();
            if let Some(u) = url {
                fresh.client.url = AppConfig::sanitize_server_url(&u);
            }
            fresh.validate()?;
            *config.write().await = fresh;
            config.save(path).await?;
            println!("  {} Config written to {}", style("OK").green(), path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_writes_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ConfigHandle::new(AppConfig::default());

        let init = || ConfigAction::Init {
            url: Some("localhost:3000".into()),
            force: false,
        };
        run(config.clone(), &path, init(), OutputFormat::Text).await.unwrap();
        let saved = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(saved.client.url, "http://localhost:3000");
        assert_eq!(config.read().await.client.url, "http://localhost:3000");

        assert!(matches!(
            run(config, &path, init(), OutputFormat::Text).await,
            Err(SioError::Config(_))
        ));
    }
}
