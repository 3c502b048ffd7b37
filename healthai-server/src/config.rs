//! Configuration system for the `HealthAI` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/healthai/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A resolved value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    models: ModelsFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    frontend_url: Option<String>,
    extra_origins: Option<Vec<String>>,
    max_payload_size: Option<usize>,
    ping_interval_secs: Option<u64>,
    ping_timeout_secs: Option<u64>,
}

/// `[models]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ModelsFileConfig {
    dir: Option<PathBuf>,
    max_upload_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "HealthAI backend server")]
pub struct ServerCliArgs {
    /// Address to bind the server to (e.g. `127.0.0.1:5000`).
    #[arg(short, long, env = "HEALTHAI_BIND")]
    pub bind: Option<String>,

    /// Port to listen on all interfaces; ignored when `--bind` is given.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Path to config file (default: `~/.config/healthai/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Origin of the web frontend allowed by CORS.
    #[arg(long, env = "FRONTEND_URL")]
    pub frontend_url: Option<String>,

    /// Directory uploaded model files are stored in.
    #[arg(long, env = "HEALTHAI_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Maximum model upload size in bytes.
    #[arg(long)]
    pub max_upload_size: Option<usize>,

    /// Maximum WebSocket frame size in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "HEALTHAI_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Frontend origin used when none is configured.
const DEFAULT_FRONTEND_URL: &str = "https://healthai-frontend-o32c.onrender.com";

/// Local development origins allowed alongside the frontend.
const DEFAULT_EXTRA_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:5000`).
    pub bind_addr: String,
    /// Origins allowed by CORS, frontend first.
    pub allowed_origins: Vec<String>,
    /// Directory holding uploaded model files.
    pub model_dir: PathBuf,
    /// Maximum accepted request body for model uploads, in bytes.
    pub max_upload_size: usize,
    /// Maximum accepted WebSocket frame, in bytes.
    pub max_payload_size: usize,
    /// How often the server pings each socket.
    pub ping_interval: Duration,
    /// How long a socket may stay silent before it is closed.
    pub ping_timeout: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut allowed_origins = vec![DEFAULT_FRONTEND_URL.to_string()];
        allowed_origins.extend(DEFAULT_EXTRA_ORIGINS.iter().map(|o| (*o).to_string()));
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            allowed_origins,
            model_dir: PathBuf::from("aimodels"),
            max_upload_size: 512 * 1024 * 1024,
            max_payload_size: 64 * 1024,
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a resolved value is out of range.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Self {
        let defaults = Self::default();

        let bind_addr = cli
            .bind
            .clone()
            .or_else(|| cli.port.map(|port| format!("0.0.0.0:{port}")))
            .or_else(|| file.server.bind_addr.clone())
            .unwrap_or(defaults.bind_addr);

        let frontend_url = cli
            .frontend_url
            .clone()
            .or_else(|| file.server.frontend_url.clone())
            .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string());
        let extra_origins = file.server.extra_origins.clone().unwrap_or_else(|| {
            DEFAULT_EXTRA_ORIGINS
                .iter()
                .map(|o| (*o).to_string())
                .collect()
        });
        let mut allowed_origins = vec![frontend_url];
        for origin in extra_origins {
            if !allowed_origins.contains(&origin) {
                allowed_origins.push(origin);
            }
        }

        Self {
            bind_addr,
            allowed_origins,
            model_dir: cli
                .model_dir
                .clone()
                .or_else(|| file.models.dir.clone())
                .unwrap_or(defaults.model_dir),
            max_upload_size: cli
                .max_upload_size
                .or(file.models.max_upload_size)
                .unwrap_or(defaults.max_upload_size),
            max_payload_size: cli
                .max_payload_size
                .or(file.server.max_payload_size)
                .unwrap_or(defaults.max_payload_size),
            ping_interval: file
                .server
                .ping_interval_secs
                .map_or(defaults.ping_interval, Duration::from_secs),
            ping_timeout: file
                .server
                .ping_timeout_secs
                .map_or(defaults.ping_timeout, Duration::from_secs),
            log_level: cli.log_level.clone(),
        }
    }

    /// Rejects values the server cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "ping_interval_secs must be positive".to_string(),
            ));
        }
        if self.ping_timeout <= self.ping_interval {
            return Err(ConfigError::Invalid(format!(
                "ping_timeout_secs ({}) must exceed ping_interval_secs ({})",
                self.ping_timeout.as_secs(),
                self.ping_interval.as_secs()
            )));
        }
        if self.max_payload_size == 0 {
            return Err(ConfigError::Invalid(
                "max_payload_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("healthai").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
