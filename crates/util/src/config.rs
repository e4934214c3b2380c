use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr};

use super::server_bind_address;

const DEFAULT_DATABASE_URL: &str = "sqlite://badger.db";
const DEFAULT_MEDIA_ROOT: &str = "media/uploads";
const DEFAULT_MEDIA_URL: &str = "/media/uploads/";
const DEFAULT_CREATOR_BADGE: &str = "creator";
const DEFAULT_UPLOAD_MAX_BYTES: usize = 10 * 1024 * 1024;
const DEVELOPMENT_SESSION_SECRET: &[u8] = b"badger-development-session-secret";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Target box that uploaded images are cropped and scaled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBox {
    pub width: u32,
    pub height: u32,
}

impl Default for ImageBox {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
        }
    }
}

impl FromStr for ImageBox {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `256x256`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (width, height) = value
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT (got {value})"))?;
        let width: u32 = width
            .trim()
            .parse()
            .map_err(|_| format!("invalid width '{width}'"))?;
        let height: u32 = height
            .trim()
            .parse()
            .map_err(|_| format!("invalid height '{height}'"))?;
        if width == 0 || height == 0 {
            return Err("dimensions must be positive".to_string());
        }
        Ok(Self { width, height })
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub media_root: PathBuf,
    pub media_url: String,
    pub image_max_size: ImageBox,
    pub upload_max_bytes: usize,
    pub session_secret: Vec<u8>,
    pub creator_badge_slug: String,
    pub tags_enabled: bool,
    pub prerequisite_cascade: bool,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let media_root = env::var("BADGER_MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_MEDIA_ROOT));
        let media_url = normalize_media_url(
            env::var("BADGER_MEDIA_URL").unwrap_or_else(|_| DEFAULT_MEDIA_URL.to_string()),
        );

        let image_max_size = match env::var("BADGER_IMG_MAX_SIZE") {
            Ok(raw) => raw.parse().map_err(|reason| ConfigError::InvalidValue {
                variable: "BADGER_IMG_MAX_SIZE",
                reason,
            })?,
            Err(_) => ImageBox::default(),
        };

        let upload_max_bytes = match env::var("BADGER_UPLOAD_MAX_BYTES") {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => bytes,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        variable: "BADGER_UPLOAD_MAX_BYTES",
                        reason: format!("expected a positive byte count (got {raw})"),
                    })
                }
            },
            Err(_) => DEFAULT_UPLOAD_MAX_BYTES,
        };

        let session_secret = match env::var("BADGER_SESSION_SECRET") {
            Ok(raw) => hex::decode(raw.trim()).map_err(|err| ConfigError::InvalidValue {
                variable: "BADGER_SESSION_SECRET",
                reason: format!("expected hex encoded bytes: {err}"),
            })?,
            Err(_) if environment == Environment::Production => {
                return Err(ConfigError::MissingVariable("BADGER_SESSION_SECRET"))
            }
            Err(_) => DEVELOPMENT_SESSION_SECRET.to_vec(),
        };
        if session_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                variable: "BADGER_SESSION_SECRET",
                reason: "secret must not be empty".to_string(),
            });
        }

        let creator_badge_slug = env::var("BADGER_CREATOR_BADGE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CREATOR_BADGE.to_string());

        let tags_enabled = parse_flag("BADGER_TAGS_ENABLED", false)?;
        let prerequisite_cascade = parse_flag("BADGER_PREREQUISITE_CASCADE", false)?;

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            media_root,
            media_url,
            image_max_size,
            upload_max_bytes,
            session_secret,
            creator_badge_slug,
            tags_enabled,
            prerequisite_cascade,
        })
    }
}

fn parse_flag(variable: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(variable) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            variable,
            reason: format!("expected a boolean (got {other})"),
        }),
    }
}

fn normalize_media_url(mut value: String) -> String {
    if !value.ends_with('/') {
        value.push('/');
    }
    value
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVariable(&'static str),
    InvalidValue {
        variable: &'static str,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVariable(variable) => write!(f, "{variable} must be set"),
            Self::InvalidValue { variable, reason } => {
                write!(f, "invalid {variable} value: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_BIND_ADDR;

    const VARIABLES: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_URL",
        "BADGER_MEDIA_ROOT",
        "BADGER_MEDIA_URL",
        "BADGER_IMG_MAX_SIZE",
        "BADGER_UPLOAD_MAX_BYTES",
        "BADGER_SESSION_SECRET",
        "BADGER_CREATOR_BADGE",
        "BADGER_TAGS_ENABLED",
        "BADGER_PREREQUISITE_CASCADE",
    ];

    fn clear_env() {
        for variable in VARIABLES {
            env::remove_var(variable);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.media_url, "/media/uploads/");
        assert_eq!(config.image_max_size, ImageBox::default());
        assert_eq!(config.creator_badge_slug, "creator");
        assert_eq!(config.upload_max_bytes, 10 * 1024 * 1024);
        assert!(!config.tags_enabled);
        assert!(!config.prerequisite_cascade);
        assert!(!config.session_secret.is_empty());
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_env();
    }

    #[test]
    fn production_requires_session_secret() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(err, ConfigError::MissingVariable("BADGER_SESSION_SECRET")));

        clear_env();
    }

    #[test]
    fn parses_production_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        env::set_var("BADGER_SESSION_SECRET", "deadbeef");
        env::set_var("BADGER_MEDIA_URL", "https://cdn.example.com/badges");
        env::set_var("BADGER_IMG_MAX_SIZE", "128x64");
        env::set_var("BADGER_TAGS_ENABLED", "on");
        env::set_var("BADGER_PREREQUISITE_CASCADE", "true");
        env::set_var("BADGER_UPLOAD_MAX_BYTES", "4096");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.session_secret, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(config.media_url, "https://cdn.example.com/badges/");
        assert_eq!(
            config.image_max_size,
            ImageBox {
                width: 128,
                height: 64
            }
        );
        assert!(config.tags_enabled);
        assert!(config.prerequisite_cascade);
        assert_eq!(config.upload_max_bytes, 4096);

        clear_env();
    }

    #[test]
    fn rejects_malformed_image_box() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("BADGER_IMG_MAX_SIZE", "256");

        let err = AppConfig::from_env().expect_err("image box should be rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                variable: "BADGER_IMG_MAX_SIZE",
                ..
            }
        ));

        clear_env();
    }

    #[test]
    fn rejects_invalid_upload_limit() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        for raw in ["0", "ten megabytes"] {
            clear_env();
            env::set_var("BADGER_UPLOAD_MAX_BYTES", raw);

            let err = AppConfig::from_env().expect_err("upload limit should be rejected");
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    variable: "BADGER_UPLOAD_MAX_BYTES",
                    ..
                }
            ));
        }

        clear_env();
    }

    #[test]
    fn image_box_rejects_zero_dimensions() {
        assert!("0x10".parse::<ImageBox>().is_err());
        assert_eq!(
            "64X32".parse::<ImageBox>(),
            Ok(ImageBox {
                width: 64,
                height: 32
            })
        );
    }
}
