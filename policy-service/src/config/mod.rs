use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::utils::listing::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use std::env;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound keeps `created_at + ttl` well inside chrono's range.
pub const MAX_TRANSACTION_TTL_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub pagination: PaginationConfig,
    pub transaction: TransactionConfig,
    pub acr: AcrConfig,
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Without a URL the service runs on in-memory stores (dev only).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub public_key_path: Option<String>,
    pub hs256_secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub internal_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    pub default_limit: i64,
    pub max_limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    pub ttl_seconds: i64,
    pub purge_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcrConfig {
    /// Strongest first.
    pub values_supported: Vec<String>,
    pub default_acr: Option<String>,
}

/// Organization/tenant pairs loaded into the in-memory directory when the
/// service runs without a database. Rejected in production.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevConfig {
    pub organization_tenants: Vec<(Uuid, Uuid)>,
}

impl PolicyServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = PolicyServiceConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("policy-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_optional("DATABASE_URL"),
                max_connections: parse_env(
                    "DATABASE_MAX_CONNECTIONS",
                    &get_env("DATABASE_MAX_CONNECTIONS", Some("10"), false)?,
                )?,
            },
            jwt: JwtConfig {
                public_key_path: get_optional("JWT_PUBLIC_KEY_PATH"),
                hs256_secret: get_optional("JWT_HS256_SECRET"),
                issuer: get_optional("JWT_ISSUER"),
                audience: get_optional("JWT_AUDIENCE"),
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
                internal_api_key: get_env("INTERNAL_API_KEY", None, true)?,
            },
            pagination: PaginationConfig {
                default_limit: parse_env(
                    "PAGINATION_DEFAULT_LIMIT",
                    &get_env(
                        "PAGINATION_DEFAULT_LIMIT",
                        Some(&DEFAULT_PAGE_LIMIT.to_string()),
                        false,
                    )?,
                )?,
                max_limit: parse_env(
                    "PAGINATION_MAX_LIMIT",
                    &get_env("PAGINATION_MAX_LIMIT", Some(&MAX_PAGE_LIMIT.to_string()), false)?,
                )?,
            },
            transaction: TransactionConfig {
                ttl_seconds: parse_env(
                    "TRANSACTION_TTL_SECONDS",
                    &get_env("TRANSACTION_TTL_SECONDS", Some("600"), false)?,
                )?,
                purge_interval_seconds: parse_env(
                    "TRANSACTION_PURGE_INTERVAL_SECONDS",
                    &get_env("TRANSACTION_PURGE_INTERVAL_SECONDS", Some("60"), false)?,
                )?,
            },
            acr: AcrConfig {
                values_supported: get_optional("ACR_VALUES_SUPPORTED")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_default(),
                default_acr: get_optional("ACR_DEFAULT"),
            },
            dev: DevConfig {
                organization_tenants: get_optional("DEV_ORGANIZATION_TENANTS")
                    .map(|raw| parse_organization_tenants(&raw))
                    .transpose()?
                    .unwrap_or_default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.pagination.max_limit < 1 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PAGINATION_MAX_LIMIT must be positive"
            )));
        }

        if self.pagination.default_limit < 1
            || self.pagination.default_limit > self.pagination.max_limit
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PAGINATION_DEFAULT_LIMIT must be between 1 and PAGINATION_MAX_LIMIT"
            )));
        }

        if self.transaction.ttl_seconds <= 0
            || self.transaction.ttl_seconds > MAX_TRANSACTION_TTL_SECONDS
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TRANSACTION_TTL_SECONDS must be between 1 and {}",
                MAX_TRANSACTION_TTL_SECONDS
            )));
        }

        if self.transaction.purge_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TRANSACTION_PURGE_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.jwt.public_key_path.is_none() && self.jwt.hs256_secret.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Either JWT_PUBLIC_KEY_PATH or JWT_HS256_SECRET must be set"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.database.url.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production"
                )));
            }

            if self.jwt.public_key_path.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_PUBLIC_KEY_PATH is required in production"
                )));
            }

            if !self.dev.organization_tenants.is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DEV_ORGANIZATION_TENANTS must not be set in production"
                )));
            }

            if self.jwt.hs256_secret.is_some() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_HS256_SECRET must not be set in production"
                )));
            }
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

fn get_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses `org:tenant,org:tenant`.
fn parse_organization_tenants(raw: &str) -> Result<Vec<(Uuid, Uuid)>, AppError> {
    split_list(raw)
        .iter()
        .map(|pair| {
            let invalid = || {
                AppError::ConfigError(anyhow::anyhow!(
                    "DEV_ORGANIZATION_TENANTS entry '{}' must be <organization_id>:<tenant_id>",
                    pair
                ))
            };
            let (org, tenant) = pair.split_once(':').ok_or_else(invalid)?;
            let org = Uuid::parse_str(org.trim()).map_err(|_| invalid())?;
            let tenant = Uuid::parse_str(tenant.trim()).map_err(|_| invalid())?;
            Ok((org, tenant))
        })
        .collect()
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
