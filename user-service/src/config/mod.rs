use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::services::sanitizer::PageLimits;
use crate::services::users::ServiceSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct UserServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub query: QueryConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub default_limit: i64,
    pub max_limit: i64,
    pub timeout_ms: u64,
}

impl QueryConfig {
    pub fn limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub queue_capacity: usize,
    pub workers: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
        }
    }
}

impl UserServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = UserServiceConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("user-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            query: QueryConfig {
                default_limit: parse_env("QUERY_DEFAULT_LIMIT", "20", is_prod)?,
                max_limit: parse_env("QUERY_MAX_LIMIT", "100", is_prod)?,
                timeout_ms: parse_env("QUERY_TIMEOUT_MS", "5000", is_prod)?,
            },
            audit: AuditConfig {
                queue_capacity: parse_env("AUDIT_QUEUE_CAPACITY", "1024", is_prod)?,
                workers: parse_env("AUDIT_WORKERS", "4", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            limits: self.query.limits(),
            default_timeout: self.query.timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MAX_CONNECTIONS must be greater than 0"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.query.default_limit <= 0 || self.query.max_limit <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "QUERY_DEFAULT_LIMIT and QUERY_MAX_LIMIT must be positive"
            )));
        }

        if self.query.default_limit > self.query.max_limit {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "QUERY_DEFAULT_LIMIT cannot exceed QUERY_MAX_LIMIT"
            )));
        }

        if self.query.timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "QUERY_TIMEOUT_MS must be greater than 0"
            )));
        }

        if self.audit.queue_capacity == 0 || self.audit.workers == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUDIT_QUEUE_CAPACITY and AUDIT_WORKERS must be greater than 0"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
