//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.
//! The key material is parsed here and handed to the engine once at startup.

use crate::crypto::KeyMaterial;
use crate::schema::{validate_identifier, SensitivityPolicy};
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::warn;

const DEV_JWT_SECRET: &str = "audit-mirror-dev-secret-change-in-production";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
    pub use_tls: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_connections: 10,
            use_tls: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Mirroring engine configuration
#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub encryption_key: KeyMaterial,
    /// Schema for unqualified table names
    pub schema: String,
    pub policy: SensitivityPolicy,
    /// Tables attached at startup
    pub tables: Vec<String>,
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub cors: CorsConfig,
    pub audit: AuditSettings,
    pub jwt_secret: String,
}

impl Settings {
    /// Load settings from `.env` and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: parse_or(var("HOST"), "HOST", ServerConfig::default().host)?,
            port: parse_or(var("PORT"), "PORT", ServerConfig::default().port)?,
        };

        let max_connections = parse_or(var("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 10usize)?;

        // DATABASE_URL wins over the individual DB_* variables
        let database = match var("DATABASE_URL") {
            Some(url) => Self::parse_database_url(&url, max_connections)?,
            None => {
                let defaults = DatabaseSettings::default();
                let host = var("DB_HOST").unwrap_or(defaults.host);
                DatabaseSettings {
                    use_tls: requires_tls(&host, var("DB_SSLMODE").as_deref()),
                    host,
                    port: parse_or(var("DB_PORT"), "DB_PORT", defaults.port)?,
                    user: var("DB_USER").unwrap_or(defaults.user),
                    password: var("DB_PASSWORD").unwrap_or_default(),
                    database: var("DB_NAME").unwrap_or(defaults.database),
                    max_connections,
                }
            }
        };

        let cors = CorsConfig {
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|s| split_list(&s))
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let audit = Self::audit_settings(&var)?;

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set, using the development default (set it in production)");
            DEV_JWT_SECRET.to_string()
        });

        Ok(Self {
            server,
            database,
            cors,
            audit,
            jwt_secret,
        })
    }

    fn audit_settings(var: &dyn Fn(&str) -> Option<String>) -> Result<AuditSettings, ConfigError> {
        let raw_key = var("AUDIT_ENCRYPTION_KEY")
            .ok_or_else(|| ConfigError::MissingVar("AUDIT_ENCRYPTION_KEY".to_string()))?;
        let encryption_key = KeyMaterial::from_base64(&raw_key)
            .map_err(|e| ConfigError::InvalidValue(format!("AUDIT_ENCRYPTION_KEY: {}", e)))?;

        let schema = var("AUDIT_SCHEMA").unwrap_or_else(|| "public".to_string());
        validate_identifier(&schema)
            .map_err(|e| ConfigError::InvalidValue(format!("AUDIT_SCHEMA: {}", e)))?;

        let policy = match var("AUDIT_SENSITIVE_PATTERNS") {
            Some(list) => {
                let patterns: Vec<String> =
                    split_list(&list).into_iter().map(|p| p.to_lowercase()).collect();
                if patterns.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "AUDIT_SENSITIVE_PATTERNS is set but lists no patterns".to_string(),
                    ));
                }
                SensitivityPolicy::NamePatterns(patterns)
            }
            None => SensitivityPolicy::AllExceptIdentifiers,
        };

        let tables = var("AUDIT_TABLES").map(|s| split_list(&s)).unwrap_or_default();

        Ok(AuditSettings {
            encryption_key,
            schema,
            policy,
            tables,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(
        raw: &str,
        max_connections: usize,
    ) -> Result<DatabaseSettings, ConfigError> {
        let parsed = url::Url::parse(raw).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::InvalidValue(format!(
                "Unsupported DATABASE_URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let sslmode = parsed
            .query_pairs()
            .find(|(k, _)| k == "sslmode")
            .map(|(_, v)| v.into_owned());

        Ok(DatabaseSettings {
            use_tls: requires_tls(&host, sslmode.as_deref()),
            port: parsed.port().unwrap_or(5432),
            user: if parsed.username().is_empty() {
                "postgres".to_string()
            } else {
                parsed.username().to_string()
            },
            password: parsed.password().unwrap_or_default().to_string(),
            host,
            database,
            max_connections,
        })
    }
}

/// Managed hosts such as Neon reject plain connections
fn requires_tls(host: &str, sslmode: Option<&str>) -> bool {
    host.contains("neon.tech") || matches!(sslmode, Some("require" | "verify-ca" | "verify-full"))
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}='{}'", key, v))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
