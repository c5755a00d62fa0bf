use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Args;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file and can be partially overridden from the
/// command line through [`ProbeArgs`].
///
/// # Examples
///
/// ```toml
/// platform_disabled = false
/// transport = "udp"
///
/// [[ice_servers]]
/// urls = ["turn:relay.example.com:3478?transport=udp"]
/// username = "probe"
/// credential = "secret"
///
/// [connect]
/// max_failures = 10
/// connection_timeout_ms = 30000
/// negotiation_timeout_ms = 10000
/// ```
///
/// # Fields Overview
///
/// - `platform_disabled`: if `true`, every diagnostic session is refused up front
/// - `transport`: which channel implementation the controller drives
/// - `ice_servers`: relay/helper servers handed to the transport; an empty list is allowed
/// here and reported by the controller as "no servers given"
/// - `connect`: retry budget and watchdog durations for channel establishment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub platform_disabled: bool,
    pub transport: TransportKind,
    pub ice_servers: Vec<IceServer>,
    pub connect: ConnectSettings,
}

/// Command-line overrides for a diagnostic run.
#[derive(Args, Debug, Clone, Default)]
pub struct ProbeArgs {
    /// Path to the TOML configuration file
    ///
    /// # Command Line
    /// Positional argument, or the `RELAY_PROBE_CONFIG` environment variable
    #[arg(env = "RELAY_PROBE_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Server URL to probe; replaces the configured servers when given
    ///
    /// # Command Line
    /// Use `--server <URL>`, repeatable
    #[arg(long = "server")]
    pub servers: Vec<String>,

    /// Channel implementation to use
    ///
    /// # Command Line
    /// Use `--transport udp|loopback`
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Print the full session report after the summary
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub report: bool,
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    /// - `ConfigError::IoError` if the file cannot be read
    /// - `ConfigError::TomlError` if it is not valid TOML for this structure
    /// - any validation error from [`Config::validate`]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        debug!(
            "Configuration parsed: {} ICE server(s), transport {:?}",
            config.ice_servers.len(),
            config.transport
        );
        Ok(config)
    }

    /// Builds the effective configuration for a run: file values (or defaults when no
    /// file is given) with the command-line overrides applied on top.
    pub fn from_args(args: &ProbeArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        if !args.servers.is_empty() {
            config.ice_servers = args
                .servers
                .iter()
                .map(|url| IceServer::new(url.clone()))
                .collect();
        }
        if let Some(transport) = args.transport {
            config.transport = transport;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks server URLs and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(ConfigError::BadServerUrl(
                    "ICE server entry without urls".to_string(),
                ));
            }
            for url in &server.urls {
                ServerUrl::parse(url)?;
            }
        }

        if self.connect.max_failures == 0 || self.connect.max_failures > 100 {
            return Err(ConfigError::NotInRange(format!(
                "connect.max_failures must be within 1..=100, got {}",
                self.connect.max_failures
            )));
        }
        if self.connect.connection_timeout_ms == 0 {
            return Err(ConfigError::NotInRange(
                "connect.connection_timeout_ms must be positive".to_string(),
            ));
        }
        if self.connect.negotiation_timeout_ms == 0 {
            return Err(ConfigError::NotInRange(
                "connect.negotiation_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
platform_disabled = false
transport = "loopback"

[[ice_servers]]
urls = ["turn:relay.example.com:3478?transport=udp", "turns:relay.example.com"]
username = "probe"
credential = "secret"

[connect]
max_failures = 4
"#;

    fn sample_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_file() {
        let file = sample_file();
        let config = Config::from_file(file.path()).unwrap_or_else(|e| panic!("{}", e));

        assert!(!config.platform_disabled);
        assert_eq!(config.transport, TransportKind::Loopback);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls.len(), 2);
        assert_eq!(config.connect.max_failures, 4);
        // untouched keys keep their defaults
        assert_eq!(config.connect.connection_timeout_ms, 30_000);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.ice_servers.is_empty());
    }

    #[test]
    fn test_bad_url_is_rejected() {
        let raw = r#"
[[ice_servers]]
urls = "http://relay.example.com"
"#;
        let err = Config::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::BadServerUrl(_)));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let raw = "[connect]\nmax_failures = 0\n";
        assert!(matches!(
            Config::from_toml_str(raw),
            Err(ConfigError::NotInRange(_))
        ));

        let raw = "[connect]\nnegotiation_timeout_ms = 0\n";
        assert!(matches!(
            Config::from_toml_str(raw),
            Err(ConfigError::NotInRange(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/relay-probe.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_args_override_file() {
        let file = sample_file();
        let args = ProbeArgs {
            config_file: Some(file.path().to_path_buf()),
            servers: vec!["turn:127.0.0.1:3478".to_string()],
            transport: Some(TransportKind::Udp),
            report: false,
        };

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.transport, TransportKind::Udp);
        assert_eq!(config.ice_servers, vec![IceServer::new("turn:127.0.0.1:3478")]);
        assert_eq!(config.connect.max_failures, 4);
    }

    #[derive(clap::Parser)]
    struct TestCli {
        #[command(flatten)]
        probe: ProbeArgs,
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        use clap::Parser;

        std::env::set_var("RELAY_PROBE_CONFIG", "/tmp/from-env.toml");
        let cli = TestCli::try_parse_from(["relay-probe", "--server", "stun:127.0.0.1"]);
        std::env::remove_var("RELAY_PROBE_CONFIG");

        let cli = cli.unwrap_or_else(|e| panic!("{}", e));
        assert_eq!(
            cli.probe.config_file,
            Some(PathBuf::from("/tmp/from-env.toml"))
        );
        assert_eq!(cli.probe.servers, vec!["stun:127.0.0.1".to_string()]);
    }

    #[test]
    #[serial]
    fn test_cli_without_env() {
        use clap::Parser;

        std::env::remove_var("RELAY_PROBE_CONFIG");
        let cli = TestCli::try_parse_from(["relay-probe", "--transport", "loopback", "--report"])
            .unwrap_or_else(|e| panic!("{}", e));
        assert_eq!(cli.probe.config_file, None);
        assert_eq!(cli.probe.transport, Some(TransportKind::Loopback));
        assert!(cli.probe.report);
    }
}
