//! Application configuration

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use dolo_billing::{EmailConfig, StripeConfig};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,
    pub cors_allowed_origins: Vec<String>,
    pub request_timeout: Duration,

    // Database
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Supabase (recorded for the dashboard tooling, not used by this service)
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub supabase_service_role_key: Option<String>,

    // Stripe; payment routes answer 503 when absent
    pub stripe: Option<StripeConfig>,

    // Email; sending is skipped when no API key is set
    pub email: EmailConfig,
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_address =
            env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        if bind_address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid("BIND_ADDRESS", bind_address));
        }

        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();
        if !public_url.starts_with("http://") && !public_url.starts_with("https://") {
            return Err(ConfigError::Invalid("PUBLIC_URL", public_url));
        }

        let stripe = match (optional("STRIPE_SECRET_KEY"), optional("STRIPE_WEBHOOK_SECRET")) {
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("STRIPE_WEBHOOK_SECRET")),
            (None, Some(_)) => return Err(ConfigError::Missing("STRIPE_SECRET_KEY")),
            (Some(_), Some(_)) => Some(
                StripeConfig::from_env().map_err(|e| ConfigError::Stripe(e.to_string()))?,
            ),
        };

        Ok(Self {
            // Server
            bind_address,
            public_url,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            request_timeout: Duration::from_secs(
                env::var("REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            ),

            // Database
            database_url: optional("DATABASE_URL"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Supabase
            supabase_url: optional("SUPABASE_URL"),
            supabase_anon_key: optional("SUPABASE_ANON_KEY"),
            supabase_service_role_key: optional("SUPABASE_SERVICE_ROLE_KEY"),

            stripe,
            email: EmailConfig::from_env(),
        })
    }

    /// Parsed bind address; validated in `from_env`
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::Invalid("BIND_ADDRESS", self.bind_address.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
    #[error("Stripe configuration error: {0}")]
    Stripe(String),
}
