use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Sketchface";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port used when `PORT` is not set.
pub const DEFAULT_PORT: u16 = 5000;

/// Model file looked up in the working directory when `MODEL_PATH` is not set.
pub const DEFAULT_MODEL_PATH: &str = "pix2pix_model.pt";

const DEFAULT_HOST: [u8; 4] = [0, 0, 0, 0];
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_MAX_UPLOAD_MB: u64 = 16;

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "sketchface=info,tower_http=info"
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Pretrained generator. Missing or unloadable means pass-through mode.
    pub model_path: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            max_upload_bytes: (DEFAULT_MAX_UPLOAD_MB * 1024 * 1024) as usize,
        }
    }
}

impl ServerConfig {
    /// Build the config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    ///
    /// Unset or blank variables take their defaults; values that are set but
    /// unparseable are rejected rather than silently replaced.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host: IpAddr = match get("HOST") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "HOST",
                value: raw,
            })?,
            None => IpAddr::from(DEFAULT_HOST),
        };

        let port: u16 = match get("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        let max_upload_mb: u64 = match get("MAX_UPLOAD_MB") {
            Some(raw) => match raw.trim().parse() {
                Ok(mb) if mb > 0 => mb,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "MAX_UPLOAD_MB",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_MAX_UPLOAD_MB,
        };

        Ok(Self {
            host,
            port,
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            max_upload_bytes: (max_upload_mb * 1024 * 1024) as usize,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
