//! eiscp-remote: command-line remote control for Onkyo/Integra receivers.
//!
//! Finds a receiver on the local network and queries, commands or monitors
//! it over eISCP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::debug;

use eiscp_client::command::CommandMatcher;
use eiscp_client::{SessionConfig, DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT};

mod actions;
mod catalogue;
mod logging;

const DEFAULT_CONFIG_PATH: &str = "eiscp-remote.toml";
const DEFAULT_HOST: &str = "auto";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;

/// eiscp-remote - Control Onkyo/Integra receivers over the network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_help_subcommand = true)]
struct Args {
    /// Receiver to control: "auto" to broadcast, an IP address, or a CIDR block
    #[arg(short = 'H', long, env = "EISCP_HOST")]
    host: Option<String>,

    /// How long to wait for discovery replies, in seconds
    #[arg(short = 'T', long, value_parser = parse_seconds)]
    discovery_timeout: Option<Duration>,

    /// How long to wait for a reply to a command, in seconds
    #[arg(short = 'R', long, value_parser = parse_seconds)]
    response_timeout: Option<Duration>,

    /// Additional command catalogue (TOML); its commands replace built-in ones
    #[arg(short = 'C', long)]
    commands: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log filter, e.g. "info" or "eiscp_client=debug"
    #[arg(short = 'L', long)]
    log_level: Option<String>,

    /// Also write logs to daily files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List receivers that answer discovery
    Discover {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retrieve a value (using the "QSTN" protocol command)
    Get {
        /// Command code, e.g. PWR
        code: String,
        /// Only print the returned value (and exit non-zero if it's empty)
        #[arg(short = 'o', long)]
        only_value: bool,
    },
    /// Execute a command
    Call {
        /// Command code, e.g. MVL
        code: String,
        /// Parameters, concatenated to form the value
        #[arg(required = true)]
        params: Vec<String>,
    },
    /// Connect to a receiver and continuously print its messages
    Serve,
    /// Show the documentation for a command
    Help {
        /// Command code; all commands when omitted
        code: Option<String>,
    },
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid number of seconds: {}", e))?;
    seconds(secs)
}

fn seconds(secs: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {}: {}", secs, e))
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    device: DeviceSection,
    #[serde(default)]
    session: SessionSection,
    #[serde(default)]
    commands: CommandsSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct DeviceSection {
    host: Option<String>,
    /// Seconds.
    discovery_timeout: Option<f64>,
    /// Seconds.
    response_timeout: Option<f64>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct SessionSection {
    /// Seconds.
    connect_timeout: Option<f64>,
    read_buffer_size: Option<usize>,
    queue_capacity: Option<usize>,
    noise_codes: Option<Vec<String>>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct CommandsSection {
    file: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &PathBuf) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Effective settings after merging the command line over the config file.
#[derive(Debug)]
pub struct Settings {
    pub host: String,
    pub discovery_timeout: Duration,
    pub response_timeout: Duration,
    pub commands: Option<PathBuf>,
    pub session: SessionConfig,
}

impl Settings {
    fn resolve(args: &Args, file: &ConfigFile) -> Result<Self, String> {
        let host = args
            .host
            .clone()
            .or_else(|| file.device.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let discovery_timeout = match (args.discovery_timeout, file.device.discovery_timeout) {
            (Some(timeout), _) => timeout,
            (None, Some(secs)) => seconds(secs)?,
            (None, None) => DEFAULT_DISCOVERY_TIMEOUT,
        };
        let response_timeout = match (args.response_timeout, file.device.response_timeout) {
            (Some(timeout), _) => timeout,
            (None, Some(secs)) => seconds(secs)?,
            (None, None) => DEFAULT_RESPONSE_TIMEOUT,
        };

        let commands = args
            .commands
            .clone()
            .or_else(|| file.commands.file.as_ref().map(PathBuf::from));

        let mut session = SessionConfig::default();
        if let Some(secs) = file.session.connect_timeout {
            session.connect_timeout = seconds(secs)?;
        }
        if let Some(size) = file.session.read_buffer_size {
            session.read_buffer_size = size.max(1);
        }
        if let Some(capacity) = file.session.queue_capacity {
            session.queue_capacity = capacity.max(1);
        }
        if let Some(codes) = &file.session.noise_codes {
            session.noise_codes = codes.clone();
        }

        Ok(Self {
            host,
            discovery_timeout,
            response_timeout,
            commands,
            session,
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    let file_config = match &config_path {
        Some(path) => load_config(path)
            .map_err(|e| format!("Failed to load config file {}: {}", path.display(), e))?,
        None => ConfigFile::default(),
    };

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.as_ref().map(PathBuf::from));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
    let log_level = args
        .log_level
        .as_deref()
        .or(file_config.logging.level.as_deref());
    let _log_guard =
        logging::init_logging(log_dir.as_deref(), log_retention_days, args.verbose, log_level)?;

    if let Some(path) = &config_path {
        debug!("Loaded config from: {}", path.display());
    }

    let settings = Settings::resolve(&args, &file_config)?;
    debug!("{:?}", settings);

    let registry = Arc::new(catalogue::load_registry(settings.commands.as_deref())?);
    let matcher = CommandMatcher::new(Arc::clone(&registry));

    let result = match &args.command {
        Command::Discover { json } => actions::discover(&settings, *json).await,
        Command::Get { code, only_value } => {
            actions::get(&settings, &matcher, code, *only_value).await
        }
        Command::Call { code, params } => actions::call(&settings, &matcher, code, params).await,
        Command::Serve => actions::serve(&settings, &matcher).await,
        Command::Help { code } => actions::help(&registry, code.as_deref()),
    };

    match result {
        Ok(code) => Ok(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
