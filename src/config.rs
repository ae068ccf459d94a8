//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Main database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Base connection URL for the main database. Branch URLs are derived
    /// from it by substituting only the database-name path segment.
    pub url: String,
    /// Database name extracted from the URL
    pub database: String,
    pub max_pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost:5432/postgres".to_string(),
            database: "postgres".to_string(),
            max_pool_size: 10,
        }
    }
}

/// Sizing for per-branch connection pools.
///
/// Branch databases see little traffic, so pools stay small and recycle
/// connections aggressively compared to the main pool.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchPoolConfig {
    pub max_size: usize,
    pub wait_timeout: Duration,
    pub recycle_timeout: Duration,
}

impl Default for BranchPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            wait_timeout: Duration::from_secs(10),
            recycle_timeout: Duration::from_secs(30),
        }
    }
}

/// Branching behaviour configuration
#[derive(Debug, Clone)]
pub struct BranchingConfig {
    pub enabled: bool,
    pub max_branches: usize,
    pub max_branches_per_user: usize,
    /// Default lifetime for preview branches; persistent branches never expire
    pub default_ttl_hours: i64,
    /// Directory of *.sql seed files, if any
    pub seeds_dir: Option<PathBuf>,
    /// Schema-only template database used for schema_only/seed_data creation.
    /// Defaults to "<main_db>_template".
    pub template_database: String,
    pub pool: BranchPoolConfig,
}

impl Default for BranchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_branches: 50,
            max_branches_per_user: 5,
            default_ttl_hours: 72,
            seeds_dir: None,
            template_database: "postgres_template".to_string(),
            pool: BranchPoolConfig::default(),
        }
    }
}

/// Cleanup scheduler configuration
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// Warm-up delay before the first pass after startup
    pub startup_delay: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            startup_delay: Duration::from_secs(60),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub branching: BranchingConfig,
    pub cleanup: CleanupConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        // Try DATABASE_URL first, fall back to individual variables
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                let host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
                let port = std::env::var("DB_PORT")
                    .ok()
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(5432);
                let user = std::env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
                let password = std::env::var("DB_PASSWORD").unwrap_or_default();
                let name = std::env::var("DB_NAME").unwrap_or_else(|_| "postgres".to_string());
                if password.is_empty() {
                    format!("postgres://{}@{}:{}/{}", user, host, port, name)
                } else {
                    format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, name)
                }
            }
        };

        let database_name = Self::database_name_from_url(&url)?;

        let database = DatabaseConfig {
            url,
            database: database_name.clone(),
            max_pool_size: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        };

        let pool = BranchPoolConfig {
            max_size: env_parse("BRANCH_POOL_MAX_SIZE", 5),
            wait_timeout: Duration::from_secs(env_parse("BRANCH_POOL_WAIT_TIMEOUT_SECS", 10)),
            recycle_timeout: Duration::from_secs(env_parse("BRANCH_POOL_RECYCLE_TIMEOUT_SECS", 30)),
        };

        let branching = BranchingConfig {
            enabled: std::env::var("BRANCHING_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            max_branches: env_parse("BRANCH_MAX_TOTAL", 50),
            max_branches_per_user: env_parse("BRANCH_MAX_PER_USER", 5),
            default_ttl_hours: env_parse("BRANCH_DEFAULT_TTL_HOURS", 72),
            seeds_dir: std::env::var("BRANCH_SEEDS_DIR").ok().map(PathBuf::from),
            template_database: std::env::var("BRANCH_TEMPLATE_DB")
                .unwrap_or_else(|_| format!("{}_template", database_name)),
            pool,
        };

        let cleanup = CleanupConfig {
            interval: Duration::from_secs(env_parse("CLEANUP_INTERVAL_SECS", 3600)),
            startup_delay: Duration::from_secs(env_parse("CLEANUP_STARTUP_DELAY_SECS", 60)),
        };

        Ok(Self {
            database,
            branching,
            cleanup,
        })
    }

    /// Extract the database name (path segment) from a connection URL
    fn database_name_from_url(url: &str) -> Result<String, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue("Invalid DATABASE_URL format (expected postgresql://...)".to_string())
        })?;

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }
        Ok(database)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_branching_config() {
        let config = BranchingConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_branches, 50);
        assert_eq!(config.max_branches_per_user, 5);
    }

    #[test]
    fn test_default_cleanup_interval_is_one_hour() {
        let config = CleanupConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_database_name_from_url() {
        let name =
            Settings::database_name_from_url("postgres://u:p@localhost:5432/mydb?sslmode=require")
                .unwrap();
        assert_eq!(name, "mydb");
    }

    #[test]
    fn test_database_name_missing() {
        assert!(Settings::database_name_from_url("postgres://u:p@localhost/").is_err());
        assert!(Settings::database_name_from_url("not a url").is_err());
    }
}
