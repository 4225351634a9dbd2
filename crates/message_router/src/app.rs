//! Main application logic and lifecycle management.
//!
//! `Application` owns the validated configuration and the server, runs the
//! accept loop in the background and tears it down when a shutdown signal arrives.

use crate::{
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use router_core::ACCESS_TOKEN_ENV_VAR;
use router_server::MessageRouterServer;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the accept loop gets to wind down after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(8);

pub struct Application {
    config: AppConfig,
    server: MessageRouterServer,
}

impl Application {
    /// Validates `config` and builds the server it describes.
    pub fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration validated successfully");

        display_banner();

        let server = MessageRouterServer::new(config.to_server_config()?);
        Ok(Self { config, server })
    }

    pub fn server(&self) -> &MessageRouterServer {
        &self.server
    }

    /// Runs until SIGINT or SIGTERM, then shuts down gracefully.
    ///
    /// A second signal received during shutdown exits the process at once.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
            setup_signal_handlers().await?;

            // merciless shutdown
            tokio::spawn(async move {
                if let Err(e) = setup_signal_handlers_silent().await {
                    error!("Failed to set up merciless shutdown signal handler: {e}");
                    return;
                }

                warn!("Shutdown handler received again! I'll make this quick.");
                std::process::exit(1);
            });

            Ok::<(), Box<dyn std::error::Error>>(())
        })
        .await
    }

    /// Runs until `shutdown` resolves or the accept loop fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = Result<(), Box<dyn std::error::Error>>>,
    {
        info!("🌟 Starting message router");
        self.log_configuration_summary();

        let listener = self.server.listen().await?;
        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        for (name, value) in self.server.launch_environment() {
            if name == ACCESS_TOKEN_ENV_VAR {
                info!("🔑 Launch environment: {}=<redacted>", name);
            } else {
                info!("🧭 Launch environment: {}={}", name, value);
            }
        }
        info!("✅ Message router is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            result = &mut server_handle => {
                return match result {
                    Ok(Ok(())) => {
                        warn!("Accept loop ended without a shutdown request");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                };
            }
            signal = shutdown => signal?,
        }

        info!("🛑 Shutdown requested, closing client connections...");
        let connected = self.server.broker().client_count().await;
        self.server.shutdown();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server_handle).await {
            Ok(Ok(Ok(()))) => info!("✅ Server task completed gracefully"),
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Err(_) => {
                warn!("⏰ Server task did not complete within {:?}, aborting it", SHUTDOWN_TIMEOUT);
                server_handle.abort();
            }
        }

        info!("📊 Clients connected at shutdown: {}", connected);
        info!("✅ Message router shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  🔗 WebSocket path: {}", self.config.server.websocket_path);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  📬 Outbound queue per client: {}",
            self.config.server.outbound_queue_capacity
        );
        info!(
            "  📦 Max message size: {} bytes",
            self.config.limits.max_message_size
        );
        info!(
            "  🔐 Access token required: {}",
            self.config.server.access_token.as_deref().is_some_and(|t| !t.is_empty())
        );
    }
}
