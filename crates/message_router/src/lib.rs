//! # Message Router - Main Entry Point
//!
//! Broker for topic pub/sub and request/response service calls between the
//! modules of a desktop application. This entry point handles CLI parsing,
//! configuration loading, and application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! message_router
//!
//! # Specify custom configuration
//! message_router --config production.toml
//!
//! # Override specific settings
//! message_router --bind 0.0.0.0:5000 --path /ws --access-token s3cret --log-level debug
//!
//! # JSON logging for production
//! message_router --json-logs
//! ```
//!
//! ## Configuration
//!
//! The router loads configuration from a TOML file (default: `message_router.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The router shuts down gracefully on SIGINT (Ctrl+C) and SIGTERM (Unix systems).
//! A second signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

pub use app::Application;
pub use cli::CliArgs;
pub use config::{AppConfig, LimitSettings, LoggingSettings, ServerSettings};

/// Runs the message router binary.
///
/// Exits the process with status 1 when configuration, startup or the
/// server itself fails.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = match AppConfig::load_from_file(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "❌ Failed to load configuration from {}: {e}",
                args.config_path.display()
            );
            std::process::exit(1);
        }
    };
    config.apply_overrides(&args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }
    tracing::info!("🔧 Configuration loaded from {}", args.config_path.display());

    match Application::new(config) {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}
