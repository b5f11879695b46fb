/// Configuration management for the API server
///
/// Configuration is read from environment variables (a `.env` file is loaded
/// first when present).
///
/// # Environment Variables
///
/// - `API_HOST` (default `0.0.0.0`), `API_PORT` (default `3001`)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for any (default `*`)
/// - `PRODUCTION`: `true` enables `Secure` cookies and HSTS (default `false`)
/// - `APP_BASE_URL`: frontend origin for Stripe redirects (default `http://localhost:3000`)
/// - `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `JWT_SECRET`, `JWT_REFRESH_SECRET` (required, at least 32 characters, distinct)
/// - `JWT_ACCESS_TOKEN_TTL_MINUTES` (default `15`), `JWT_REFRESH_TOKEN_TTL_DAYS` (default `7`)
/// - `JWT_MAX_REFRESH_TOKENS` (default `5`)
/// - `TYPESENSE_URL`, `TYPESENSE_API_KEY`: search is disabled unless both are set
/// - `SUPABASE_URL`, `SUPABASE_KEY`, `SUPABASE_BUCKET`: image upload is disabled unless all are set
/// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`: billing is disabled without the secret key
/// - `ENFORCE_POST_LIMITS`: subscription quota on post creation (default `true`)
///
/// # Example
///
/// ```no_run
/// use postboard_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use chrono::Duration;
use postboard_shared::auth::token_service::TokenConfig;
use std::env;
use std::str::FromStr;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,

    /// Typesense; `None` disables search
    pub search: Option<SearchConfig>,

    /// Supabase Storage; `None` rejects image uploads
    pub storage: Option<StorageConfig>,

    /// Stripe; `None` disables billing endpoints
    pub stripe: Option<StripeConfig>,

    /// Gate post creation on the subscription quota
    pub enforce_post_limits: bool,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub production: bool,
    pub app_base_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// JWT configuration
///
/// Generate secrets with `openssl rand -hex 32`.
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub refresh_secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub max_refresh_tokens: usize,
}

impl JwtConfig {
    pub fn token_config(&self) -> TokenConfig {
        TokenConfig {
            access_secret: self.secret.clone(),
            refresh_secret: self.refresh_secret.clone(),
            access_ttl: Duration::minutes(self.access_ttl_minutes),
            refresh_ttl: Duration::days(self.refresh_ttl_days),
            max_refresh_tokens: self.max_refresh_tokens,
        }
    }

    /// Refresh cookie lifetime, matching the token's
    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days)
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("refresh_secret", &"[REDACTED]")
            .field("access_ttl_minutes", &self.access_ttl_minutes)
            .field("refresh_ttl_days", &self.refresh_ttl_days)
            .field("max_refresh_tokens", &self.max_refresh_tokens)
            .finish()
    }
}

#[derive(Clone)]
pub struct SearchConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Clone)]
pub struct StorageConfig {
    pub url: String,
    pub service_key: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("url", &self.url)
            .field("service_key", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value does not
    /// parse, or the JWT settings are unusable.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };

        let api = ApiConfig {
            host: get("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "API_PORT", 3001)?,
            cors_origins: get("CORS_ORIGINS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            production: parse_bool(&get, "PRODUCTION", false)?,
            app_base_url: get("APP_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
        };

        let database = DatabaseConfig {
            url: require("DATABASE_URL")?,
            max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let jwt = JwtConfig {
            secret: require("JWT_SECRET")?,
            refresh_secret: require("JWT_REFRESH_SECRET")?,
            access_ttl_minutes: parse_or(&get, "JWT_ACCESS_TOKEN_TTL_MINUTES", 15)?,
            refresh_ttl_days: parse_or(&get, "JWT_REFRESH_TOKEN_TTL_DAYS", 7)?,
            max_refresh_tokens: parse_or(&get, "JWT_MAX_REFRESH_TOKENS", 5)?,
        };
        jwt.token_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let search = match (get("TYPESENSE_URL"), get("TYPESENSE_API_KEY")) {
            (Some(url), Some(api_key)) => Some(SearchConfig { url, api_key }),
            _ => None,
        };

        let storage = match (get("SUPABASE_URL"), get("SUPABASE_KEY"), get("SUPABASE_BUCKET")) {
            (Some(url), Some(service_key), Some(bucket)) => Some(StorageConfig {
                url,
                service_key,
                bucket,
            }),
            _ => None,
        };

        let stripe = get("STRIPE_SECRET_KEY").map(|secret_key| StripeConfig {
            secret_key,
            webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
        });

        Ok(Self {
            api,
            database,
            jwt,
            search,
            storage,
            stripe,
            enforce_post_limits: parse_bool(&get, "ENFORCE_POST_LIMITS", true)?,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// True when any origin may call the API
    pub fn allows_any_origin(&self) -> bool {
        self.api.cors_origins.iter().any(|origin| origin == "*")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value: {}", key, e)),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> anyhow::Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => anyhow::bail!("{} must be true or false, got {}", key, v),
    }
}
