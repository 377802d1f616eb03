use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the coordination service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub auth: AuthConfig,
    pub triage: TriageConfig,
    pub assignment: AssignmentConfig,
    pub intake: IntakeConfig,
    pub dispatch: DispatchConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            auth: AuthConfig::from_env(),
            triage: TriageConfig::from_env(),
            assignment: AssignmentConfig::from_env()?,
            intake: IntakeConfig::from_env()?,
            dispatch: DispatchConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Bootstrap credentials for the built-in admin account.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl AuthConfig {
    fn from_env() -> Self {
        Self {
            admin_username: env::var("APP_ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            admin_password: env::var("APP_ADMIN_PASSWORD").ok(),
        }
    }
}

/// External classifier settings. A missing API key disables the LLM path and
/// routes every triage through the deterministic rules.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub classifier_timeout: Duration,
}

impl TriageConfig {
    fn from_env() -> Self {
        Self {
            gemini_api_key: env::var("GEMINI_API_KEY").ok().filter(|v| !v.is_empty()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            classifier_timeout: Duration::from_secs(5),
        }
    }
}

/// Assignment-window and reassignment tuning.
#[derive(Debug, Clone)]
pub struct AssignmentConfig {
    pub window: Duration,
    pub reject_cooldown: Duration,
    pub sweep_interval: Duration,
}

impl AssignmentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            window: Duration::from_secs(env_u64("ASSIGNMENT_WINDOW_SECONDS", 600)?),
            reject_cooldown: Duration::from_secs(env_u64("REJECT_COOLDOWN_SECONDS", 900)?),
            sweep_interval: Duration::from_secs(env_u64("SWEEP_INTERVAL_SECONDS", 20)?),
        })
    }
}

/// Mobile intake verification tuning.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub duplicate_radius_m: f64,
    pub duplicate_window: Duration,
    pub duplicate_threshold: usize,
    pub fraud_review_threshold: f64,
    pub weather_cache_ttl: Duration,
    pub weather_timeout: Duration,
    pub stt_timeout: Duration,
}

impl IntakeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            duplicate_radius_m: env_f64("DUPLICATE_RADIUS_M", 500.0)?,
            duplicate_window: Duration::from_secs(env_u64("DUPLICATE_WINDOW_SECONDS", 1800)?),
            duplicate_threshold: env_u64("DUPLICATE_THRESHOLD", 3)? as usize,
            fraud_review_threshold: env_f64("FRAUD_REVIEW_THRESHOLD", 0.8)?,
            weather_cache_ttl: Duration::from_secs(env_u64("WEATHER_CACHE_TTL_SECONDS", 600)?),
            weather_timeout: Duration::from_secs(3),
            stt_timeout: Duration::from_secs(10),
        })
    }
}

/// Outbound dispatch queue tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub workers: usize,
    pub fairness_interval: u64,
    pub poll_interval: Duration,
    pub deliver_timeout: Duration,
}

impl DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: env::var("MOBILE_TICKET_CREATION_ENDPOINT")
                .ok()
                .filter(|v| !v.is_empty()),
            auth_token: env::var("MOBILE_TICKET_ENDPOINT_AUTH_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            max_attempts: env_u64("MOBILE_DISPATCH_MAX_ATTEMPTS", 6)?.max(1) as u32,
            initial_backoff: Duration::from_secs_f64(
                env_f64("MOBILE_DISPATCH_INITIAL_BACKOFF_SECONDS", 1.0)?.max(0.2),
            ),
            max_backoff: Duration::from_secs(env_u64("DISPATCH_MAX_BACKOFF_SECONDS", 300)?),
            workers: env_u64("DISPATCH_WORKERS", 4)?.max(1) as usize,
            fairness_interval: env_u64("DISPATCH_FAIRNESS_INTERVAL", 8)?.max(2),
            poll_interval: Duration::from_millis(env_u64("DISPATCH_POLL_INTERVAL_MS", 500)?),
            deliver_timeout: Duration::from_secs(15),
        })
    }
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

fn env_f64(key: &'static str, default: f64) -> Result<f64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidNumber { .. } => None,
        }
    }
}
