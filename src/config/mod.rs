use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding the page shell (`index.html` and assets)
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Origins allowed to call the API with credentials from another host.
    /// Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: default_static_dir(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static/dist")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for session tokens. Generated per process when absent.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub secure_cookies: bool,
    /// Manager account ensured at startup
    #[serde(default = "default_manager_email")]
    pub manager_email: String,
    #[serde(default)]
    pub manager_password: Option<String>,
    #[serde(default = "default_manager_name")]
    pub manager_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            session_ttl_days: default_session_ttl_days(),
            cookie_name: default_cookie_name(),
            secure_cookies: false,
            manager_email: default_manager_email(),
            manager_password: None,
            manager_name: default_manager_name(),
        }
    }
}

/// Longest session lifetime accepted from configuration
pub const MAX_SESSION_TTL_DAYS: i64 = 3650;

fn default_session_ttl_days() -> i64 {
    7
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_manager_email() -> String {
    "manager@gymdesk.local".to_string()
}

fn default_manager_name() -> String {
    "Gym Manager".to_string()
}

/// Path trees scoped to each role and where each role lands when it strays.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_manager_prefix")]
    pub manager_prefix: String,
    #[serde(default = "default_customer_prefix")]
    pub customer_prefix: String,
    #[serde(default = "default_manager_landing")]
    pub manager_landing: String,
    #[serde(default = "default_customer_landing")]
    pub customer_landing: String,
    /// Public entry page for unauthenticated visitors
    #[serde(default = "default_login_page")]
    pub login_page: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            manager_prefix: default_manager_prefix(),
            customer_prefix: default_customer_prefix(),
            manager_landing: default_manager_landing(),
            customer_landing: default_customer_landing(),
            login_page: default_login_page(),
        }
    }
}

fn default_manager_prefix() -> String {
    "/manager".to_string()
}

fn default_customer_prefix() -> String {
    "/customer".to_string()
}

fn default_manager_landing() -> String {
    "/manager/dashboard".to_string()
}

fn default_customer_landing() -> String {
    "/customer/dashboard".to_string()
}

fn default_login_page() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    /// Where uploaded images are written (default: <data_dir>/uploads)
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| "Failed to parse configuration file")?;
            config
                .validate()
                .with_context(|| format!("Invalid configuration in {}", path.display()))?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    /// Reject values the server cannot start with
    pub fn validate(&self) -> Result<()> {
        let ttl = self.auth.session_ttl_days;
        if !(1..=MAX_SESSION_TTL_DAYS).contains(&ttl) {
            bail!(
                "auth.session_ttl_days must be between 1 and {}, got {}",
                MAX_SESSION_TTL_DAYS,
                ttl
            );
        }
        if self.auth.cookie_name.trim().is_empty() {
            bail!("auth.cookie_name must not be empty");
        }

        let manager = validate_prefix("guard.manager_prefix", &self.guard.manager_prefix)?;
        let customer = validate_prefix("guard.customer_prefix", &self.guard.customer_prefix)?;
        if manager == customer {
            bail!("guard.manager_prefix and guard.customer_prefix must differ");
        }
        Ok(())
    }

    /// Resolved upload directory
    pub fn upload_dir(&self) -> PathBuf {
        self.uploads
            .dir
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("uploads"))
    }
}

/// A guarded page tree must be a rooted path below `/`
fn validate_prefix<'a>(key: &str, prefix: &'a str) -> Result<&'a str> {
    let trimmed = prefix.trim_end_matches('/');
    if !prefix.starts_with('/') || trimmed.is_empty() {
        bail!("{} must be a path below / such as /manager, got {:?}", key, prefix);
    }
    Ok(trimmed)
}
