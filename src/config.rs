/// Configuration management for the moderation server
use crate::error::{ModResult, ModerationError};
use crate::moderation::types::UserId;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub moderation: ModerationConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// Deadline applied to every core call made by an HTTP handler
    pub request_timeout_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for caller bearer tokens
    pub jwt_secret: String,
    /// Users holding every moderator capability without a privilege row
    pub admin_user_ids: Vec<UserId>,
}

/// Moderation policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Suspension length used by automated verdicts and report resolutions
    pub default_suspension_days: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ModResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("GN_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("GN_PORT")
            .unwrap_or_else(|_| "8085".to_string())
            .parse()
            .map_err(|_| ModerationError::InvalidArgument("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();
        let request_timeout_secs = env::var("GN_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let database_path = env::var("GN_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/moderation.sqlite"));
        let max_connections = env::var("GN_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let jwt_secret = env::var("GN_JWT_SECRET")
            .map_err(|_| ModerationError::InvalidArgument("JWT secret required".to_string()))?;

        let admin_user_ids = parse_user_ids(&env::var("GN_ADMIN_USER_IDS").unwrap_or_default())?;

        let default_suspension_days = env::var("GN_DEFAULT_SUSPENSION_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .map_err(|_| {
                ModerationError::InvalidArgument("Invalid default suspension days".to_string())
            })?;

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                request_timeout_secs,
            },
            storage: StorageConfig {
                database_path,
                max_connections,
            },
            authentication: AuthConfig {
                jwt_secret,
                admin_user_ids,
            },
            moderation: ModerationConfig {
                default_suspension_days,
            },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ModResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ModerationError::InvalidArgument(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(ModerationError::InvalidArgument(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.service.request_timeout_secs == 0 {
            return Err(ModerationError::InvalidArgument(
                "Request timeout must be positive".to_string(),
            ));
        }

        if self.moderation.default_suspension_days <= 0 {
            return Err(ModerationError::InvalidArgument(
                "Default suspension days must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_secs)
    }
}

/// Parse a comma-separated list of numeric user ids
fn parse_user_ids(raw: &str) -> ModResult<Vec<UserId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<UserId>()
                .map_err(|_| ModerationError::InvalidArgument(format!("Invalid user id: {}", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 8085,
                version: "0.1.0".to_string(),
                request_timeout_secs: 30,
            },
            storage: StorageConfig {
                database_path: PathBuf::from("./data/moderation.sqlite"),
                max_connections: 10,
            },
            authentication: AuthConfig {
                jwt_secret: "a".repeat(32),
                admin_user_ids: vec![1],
            },
            moderation: ModerationConfig {
                default_suspension_days: 7,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut short_secret = config();
        short_secret.authentication.jwt_secret = "short".to_string();
        assert!(short_secret.validate().is_err());

        let mut no_suspension = config();
        no_suspension.moderation.default_suspension_days = 0;
        assert!(no_suspension.validate().is_err());

        let mut no_timeout = config();
        no_timeout.service.request_timeout_secs = 0;
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_parse_user_ids() {
        assert_eq!(parse_user_ids(" 1, 2 ,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_user_ids("").unwrap().is_empty());
        assert!(parse_user_ids("1,abc").is_err());
    }
}
