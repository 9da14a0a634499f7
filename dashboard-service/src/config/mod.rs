use dashboard_core::config as core_config;
use dashboard_core::error::AppError;
use secrecy::Secret;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Service settings. Holds secrets, so it is shared behind an `Arc` rather
/// than cloned.
#[derive(Debug)]
pub struct DashboardConfig {
    pub common: core_config::Config,
    pub auth: AuthProviderSettings,
    pub role_store: RoleStoreSettings,
    /// When set, `POST /api/setUserRole` also requires `X-Admin-Api-Key`.
    pub admin_api_key: Option<Secret<String>>,
    /// Role written for accounts created through `/signup`.
    pub signup_default_role: String,
    /// Directory for per-browser warm-start mirror files.
    pub session_mirror_dir: Option<PathBuf>,
    /// Browser sessions unused for this long lose their live state.
    pub session_idle_timeout: Duration,
    /// Mark the session cookie `Secure`; needs HTTPS in front.
    pub secure_cookies: bool,
}

#[derive(Debug)]
pub enum AuthProviderSettings {
    Memory,
    IdentityToolkit(IdentityToolkitConfig),
}

#[derive(Debug)]
pub struct IdentityToolkitConfig {
    pub api_key: Secret<String>,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub enum RoleStoreSettings {
    Memory,
    MongoDb(MongoConfig),
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl DashboardConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `load` passes the process
    /// environment.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_prod = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()) == "prod";
        let get = |key: &str, default: Option<&str>| get_env(&lookup, key, default, is_prod);

        let auth = match get("AUTH_PROVIDER", Some("memory"))?.as_str() {
            "memory" => AuthProviderSettings::Memory,
            "identity_toolkit" => AuthProviderSettings::IdentityToolkit(IdentityToolkitConfig {
                api_key: Secret::new(get("IDENTITY_TOOLKIT_API_KEY", None)?),
                base_url: get("IDENTITY_TOOLKIT_BASE_URL", Some(DEFAULT_IDENTITY_TOOLKIT_URL))?,
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unknown AUTH_PROVIDER '{}' (expected 'memory' or 'identity_toolkit')",
                    other
                )))
            }
        };

        let role_store = match get("ROLE_STORE", Some("memory"))?.as_str() {
            "memory" => RoleStoreSettings::Memory,
            "mongodb" => RoleStoreSettings::MongoDb(MongoConfig {
                uri: get("MONGODB_URI", None)?,
                database: get("MONGODB_DATABASE", Some("dashboard_db"))?,
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unknown ROLE_STORE '{}' (expected 'memory' or 'mongodb')",
                    other
                )))
            }
        };

        let signup_default_role = get("SIGNUP_DEFAULT_ROLE", Some("user"))?;
        if signup_default_role.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SIGNUP_DEFAULT_ROLE must not be empty"
            )));
        }

        let secure_cookies = get("SESSION_COOKIE_SECURE", Some("false"))?
            .parse::<bool>()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid SESSION_COOKIE_SECURE: {}", e))
            })?;

        let session_idle_timeout = match lookup("SESSION_IDLE_TIMEOUT_SECS") {
            Some(secs) => secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "SESSION_IDLE_TIMEOUT_SECS must be a positive number of seconds"
                    ))
                })?,
            None => DEFAULT_SESSION_IDLE_TIMEOUT,
        };

        Ok(DashboardConfig {
            common,
            auth,
            role_store,
            admin_api_key: lookup("ADMIN_API_KEY")
                .filter(|key| !key.is_empty())
                .map(Secret::new),
            signup_default_role,
            session_mirror_dir: lookup("SESSION_MIRROR_DIR")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            session_idle_timeout,
            secure_cookies,
        })
    }
}

impl Default for DashboardConfig {
    /// In-memory collaborators on a random port.
    fn default() -> Self {
        Self {
            common: core_config::Config {
                port: 0,
                ..core_config::Config::default()
            },
            auth: AuthProviderSettings::Memory,
            role_store: RoleStoreSettings::Memory,
            admin_api_key: None,
            signup_default_role: "user".to_string(),
            session_mirror_dir: None,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
            secure_cookies: false,
        }
    }
}

fn get_env<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}
