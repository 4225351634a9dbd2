//! Command-line interface handling for the message router.
//!
//! Every option here overrides the matching value from the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "message_router.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for the WebSocket upgrade path
    pub websocket_path: Option<String>,
    /// Optional access token clients must present
    pub access_token: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::parse_from(std::env::args_os())
    }

    pub fn parse_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::from_matches(&command().get_matches_from(args))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            bind_address: matches.get_one::<String>("bind").cloned(),
            websocket_path: matches.get_one::<String>("path").cloned(),
            access_token: matches.get_one::<String>("access-token").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

fn command() -> Command {
    Command::new("Message Router")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Pub/sub and request/response broker for desktop application modules")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:5000)"),
        )
        .arg(
            Arg::new("path")
                .long("path")
                .value_name("PATH")
                .help("WebSocket upgrade path (e.g., /ws)"),
        )
        .arg(
            Arg::new("access-token")
                .long("access-token")
                .value_name("TOKEN")
                .help("Access token clients must present when connecting"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["message_router"]);

        assert_eq!(args.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(args.bind_address.is_none());
        assert!(args.websocket_path.is_none());
        assert!(args.access_token.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_all_overrides() {
        let args = CliArgs::parse_from([
            "message_router",
            "-c",
            "prod.toml",
            "--bind",
            "0.0.0.0:6000",
            "--path",
            "/router",
            "--access-token",
            "secret",
            "-l",
            "debug",
            "--json-logs",
        ]);

        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:6000"));
        assert_eq!(args.websocket_path.as_deref(), Some("/router"));
        assert_eq!(args.access_token.as_deref(), Some("secret"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn test_command_is_well_formed() {
        command().debug_assert();
    }
}
