//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stampa";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 4000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_DIR_CEILING_BYTES: u64 = 1024 * 1024;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RELAUNCH_ATTEMPTS: u32 = 3;
const DEFAULT_VIEWS_ROOT: &str = "views";

/// Command-line arguments for the Stampa binary.
#[derive(Debug, Parser)]
#[command(name = "stampa", version, about = "Stampa PDF rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STAMPA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Stampa HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum render request body size in bytes.
    #[arg(long = "server-max-request-bytes", value_name = "BYTES")]
    pub server_max_request_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the rolling log directory.
    #[arg(long = "log-directory", value_name = "PATH")]
    pub log_directory: Option<PathBuf>,

    /// Override the log directory size ceiling in bytes.
    #[arg(long = "log-max-directory-bytes", value_name = "BYTES")]
    pub log_max_directory_bytes: Option<u64>,

    /// Override the browser executable path (auto-detected when absent).
    #[arg(long = "browser-executable", value_name = "PATH")]
    pub browser_executable: Option<PathBuf>,

    /// Override the per-document render timeout.
    #[arg(long = "browser-render-timeout-seconds", value_name = "SECONDS")]
    pub browser_render_timeout_seconds: Option<u64>,

    /// Override the consecutive browser relaunch ceiling.
    #[arg(long = "browser-max-relaunch-attempts", value_name = "COUNT")]
    pub browser_max_relaunch_attempts: Option<u32>,

    /// Override the template views root directory.
    #[arg(long = "templates-views-root", value_name = "PATH")]
    pub templates_views_root: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub browser: BrowserSettings,
    pub templates: TemplateSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub directory: PathBuf,
    pub max_directory_bytes: NonZeroU64,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub render_timeout: Duration,
    pub max_relaunch_attempts: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub views_root: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("STAMPA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    browser: RawBrowserSettings,
    templates: RawTemplateSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.server_max_request_bytes {
            self.server.max_request_bytes = Some(limit);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(directory) = overrides.log_directory.as_ref() {
            self.logging.directory = Some(directory.clone());
        }
        if let Some(ceiling) = overrides.log_max_directory_bytes {
            self.logging.max_directory_bytes = Some(ceiling);
        }
        if let Some(path) = overrides.browser_executable.as_ref() {
            self.browser.executable = Some(path.clone());
        }
        if let Some(seconds) = overrides.browser_render_timeout_seconds {
            self.browser.render_timeout_seconds = Some(seconds);
        }
        if let Some(attempts) = overrides.browser_max_relaunch_attempts {
            self.browser.max_relaunch_attempts = Some(attempts);
        }
        if let Some(root) = overrides.templates_views_root.as_ref() {
            self.templates.views_root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            browser,
            templates,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let browser = build_browser_settings(browser)?;
        let templates = build_template_settings(templates)?;

        Ok(Self {
            server,
            logging,
            browser,
            templates,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let max_request_bytes_value = server
        .max_request_bytes
        .unwrap_or(DEFAULT_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("server.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "server.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        public_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_request_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    let directory = logging
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "logging.directory",
            "path must not be empty",
        ));
    }

    let ceiling_value = logging
        .max_directory_bytes
        .unwrap_or(DEFAULT_LOG_DIR_CEILING_BYTES);
    let max_directory_bytes = NonZeroU64::new(ceiling_value).ok_or_else(|| {
        LoadError::invalid("logging.max_directory_bytes", "must be greater than zero")
    })?;

    Ok(LoggingSettings {
        level,
        format,
        directory,
        max_directory_bytes,
    })
}

fn build_browser_settings(browser: RawBrowserSettings) -> Result<BrowserSettings, LoadError> {
    let executable = match browser.executable {
        Some(path) if path.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "browser.executable",
                "path must not be empty",
            ));
        }
        other => other,
    };

    let timeout_secs = browser
        .render_timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "browser.render_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let attempts_value = browser
        .max_relaunch_attempts
        .unwrap_or(DEFAULT_MAX_RELAUNCH_ATTEMPTS);
    let max_relaunch_attempts = non_zero_u32(
        attempts_value.into(),
        "browser.max_relaunch_attempts",
    )?;

    Ok(BrowserSettings {
        executable,
        render_timeout: Duration::from_secs(timeout_secs),
        max_relaunch_attempts,
    })
}

fn build_template_settings(templates: RawTemplateSettings) -> Result<TemplateSettings, LoadError> {
    let views_root = templates
        .views_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VIEWS_ROOT));
    if views_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "templates.views_root",
            "path must not be empty",
        ));
    }

    Ok(TemplateSettings { views_root })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
    directory: Option<PathBuf>,
    max_directory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    executable: Option<PathBuf>,
    render_timeout_seconds: Option<u64>,
    max_relaunch_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    views_root: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.public_addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn request_limit_defaults_to_10_mib() {
        let raw = RawSettings::default();
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.server.max_request_bytes.get(),
            DEFAULT_REQUEST_LIMIT_BYTES
        );
    }

    #[test]
    fn log_ceiling_defaults_to_1_mib() {
        let raw = RawSettings::default();
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.logging.max_directory_bytes.get(),
            DEFAULT_LOG_DIR_CEILING_BYTES
        );
        assert_eq!(settings.logging.directory, PathBuf::from(DEFAULT_LOG_DIR));
    }

    #[test]
    fn zero_log_ceiling_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.max_directory_bytes = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero ceiling must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "logging.max_directory_bytes",
                ..
            }
        ));
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["stampa"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "stampa",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--browser-executable",
            "/usr/bin/chromium",
            "--log-max-directory-bytes",
            "2097152",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(
                    serve.overrides.browser_executable.as_deref(),
                    Some(std::path::Path::new("/usr/bin/chromium"))
                );
                assert_eq!(serve.overrides.log_max_directory_bytes, Some(2_097_152));
            }
        }
    }

    #[test]
    fn browser_timeout_must_be_positive() {
        let mut raw = RawSettings::default();
        raw.browser.render_timeout_seconds = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero timeout must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "browser.render_timeout_seconds",
                ..
            }
        ));
    }
}
