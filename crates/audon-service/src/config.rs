//! Audon service configuration.
//!
//! Configuration is loaded from environment variables. Secrets are held in
//! `SecretString` and the database/redis URLs are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8100";

/// Default Redis URL for the HTTP session store.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default directory holding cached original avatars.
pub const DEFAULT_STORAGE_DIR: &str = "./storage";

/// Default lifetime of a participant access grant (24 hours).
pub const DEFAULT_GRANT_TTL_SECONDS: u64 = 86_400;

/// Default grace window before an empty, never-joined live room is reaped.
pub const DEFAULT_ORPHAN_GRACE_SECONDS: u64 = 30;

/// Default grace window before a departed participant's avatar is restored.
pub const DEFAULT_DISCONNECT_GRACE_SECONDS: u64 = 10;

/// Default TTL of cached per-user session data.
pub const DEFAULT_SESSION_CACHE_TTL_SECONDS: u64 = 86_400;

/// Credentials of the account that posts room announcements.
#[derive(Clone)]
pub struct BotConfig {
    /// Base URL of the bot's Mastodon server.
    pub server: String,

    /// Bot access token.
    pub access_token: SecretString,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("server", &self.server)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Audon service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Redis URL for HTTP session data.
    pub redis_url: String,

    /// Server bind address (default: "0.0.0.0:8100").
    pub bind_address: String,

    /// Public domain of this Audon instance, used in announcement links.
    pub local_domain: String,

    /// Directory holding cached original avatars.
    pub storage_dir: PathBuf,

    /// Live media service URL used for admin API calls.
    pub livekit_url: String,

    /// Live media service URL handed to clients (defaults to `livekit_url`).
    pub livekit_public_url: String,

    /// API key shared with the live media service.
    pub livekit_api_key: String,

    /// API secret shared with the live media service.
    pub livekit_api_secret: SecretString,

    pub grant_ttl_seconds: u64,

    pub orphan_grace_seconds: u64,

    pub disconnect_grace_seconds: u64,

    pub session_cache_ttl_seconds: u64,

    /// Announcement bot, enabled only when both server and token are set.
    pub bot: Option<BotConfig>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("local_domain", &self.local_domain)
            .field("storage_dir", &self.storage_dir)
            .field("livekit_url", &self.livekit_url)
            .field("livekit_public_url", &self.livekit_public_url)
            .field("livekit_api_key", &self.livekit_api_key)
            .field("livekit_api_secret", &"[REDACTED]")
            .field("grant_ttl_seconds", &self.grant_ttl_seconds)
            .field("orphan_grace_seconds", &self.orphan_grace_seconds)
            .field("disconnect_grace_seconds", &self.disconnect_grace_seconds)
            .field("session_cache_ttl_seconds", &self.session_cache_ttl_seconds)
            .field("bot", &self.bot)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;
        let local_domain = required(vars, "LOCAL_DOMAIN")?;
        let livekit_url = required(vars, "LIVEKIT_URL")?;
        let livekit_api_key = required(vars, "LIVEKIT_API_KEY")?;
        let livekit_api_secret = SecretString::from(required(vars, "LIVEKIT_API_SECRET")?);

        if local_domain.contains('/') {
            return Err(ConfigError::InvalidValue(format!(
                "LOCAL_DOMAIN must be a bare host name, got '{local_domain}'"
            )));
        }

        let redis_url = vars
            .get("REDIS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let storage_dir = PathBuf::from(
            vars.get("STORAGE_DIR")
                .cloned()
                .unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string()),
        );

        let livekit_public_url = vars
            .get("LIVEKIT_PUBLIC_URL")
            .cloned()
            .unwrap_or_else(|| livekit_url.clone());

        let grant_ttl_seconds = positive_seconds(vars, "GRANT_TTL_SECONDS", DEFAULT_GRANT_TTL_SECONDS)?;
        let orphan_grace_seconds =
            positive_seconds(vars, "ORPHAN_GRACE_SECONDS", DEFAULT_ORPHAN_GRACE_SECONDS)?;
        let disconnect_grace_seconds = positive_seconds(
            vars,
            "DISCONNECT_GRACE_SECONDS",
            DEFAULT_DISCONNECT_GRACE_SECONDS,
        )?;
        let session_cache_ttl_seconds = positive_seconds(
            vars,
            "SESSION_CACHE_TTL_SECONDS",
            DEFAULT_SESSION_CACHE_TTL_SECONDS,
        )?;

        // Both halves must be present; either alone leaves the bot disabled.
        let bot = match (vars.get("BOT_SERVER"), vars.get("BOT_ACCESS_TOKEN")) {
            (Some(server), Some(token)) if !server.is_empty() && !token.is_empty() => {
                Some(BotConfig {
                    server: server.trim_end_matches('/').to_string(),
                    access_token: SecretString::from(token.clone()),
                })
            }
            _ => None,
        };

        Ok(Config {
            database_url,
            redis_url,
            bind_address,
            local_domain,
            storage_dir,
            livekit_url: livekit_url.trim_end_matches('/').to_string(),
            livekit_public_url,
            livekit_api_key,
            livekit_api_secret,
            grant_ttl_seconds,
            orphan_grace_seconds,
            disconnect_grace_seconds,
            session_cache_ttl_seconds,
            bot,
        })
    }

    pub fn grant_ttl(&self) -> Duration {
        Duration::from_secs(self.grant_ttl_seconds)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_seconds)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_seconds)
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_seconds)
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn positive_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{key} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{key} must be greater than 0"
        )));
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://audon:pw@localhost/audon_test".to_string(),
            ),
            ("LOCAL_DOMAIN".to_string(), "audon.example".to_string()),
            ("LIVEKIT_URL".to_string(), "http://localhost:7880/".to_string()),
            ("LIVEKIT_API_KEY".to_string(), "APIkey".to_string()),
            ("LIVEKIT_API_SECRET".to_string(), "shhh-secret".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.storage_dir, PathBuf::from(DEFAULT_STORAGE_DIR));
        assert_eq!(config.livekit_url, "http://localhost:7880");
        assert_eq!(config.livekit_public_url, "http://localhost:7880/");
        assert_eq!(config.grant_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.orphan_grace(), Duration::from_secs(30));
        assert_eq!(config.disconnect_grace(), Duration::from_secs(10));
        assert_eq!(config.session_cache_ttl(), Duration::from_secs(86_400));
        assert!(config.bot.is_none());
        assert_eq!(config.livekit_api_secret.expose_secret(), "shhh-secret");
    }

    #[test]
    fn test_missing_required_vars() {
        for key in [
            "DATABASE_URL",
            "LOCAL_DOMAIN",
            "LIVEKIT_URL",
            "LIVEKIT_API_KEY",
            "LIVEKIT_API_SECRET",
        ] {
            let mut vars = base_vars();
            vars.remove(key);
            let err = Config::from_vars(&vars).unwrap_err();
            assert!(
                matches!(&err, ConfigError::MissingEnvVar(name) if name == key),
                "expected MissingEnvVar({key}), got {err:?}"
            );
        }
    }

    #[test]
    fn test_empty_required_var_is_missing() {
        let mut vars = base_vars();
        vars.insert("LIVEKIT_API_SECRET".to_string(), String::new());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_custom_durations() {
        let mut vars = base_vars();
        vars.insert("ORPHAN_GRACE_SECONDS".to_string(), "45".to_string());
        vars.insert("DISCONNECT_GRACE_SECONDS".to_string(), "3".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.orphan_grace_seconds, 45);
        assert_eq!(config.disconnect_grace_seconds, 3);
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut vars = base_vars();
        vars.insert("GRANT_TTL_SECONDS".to_string(), "0".to_string());

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(_)));
        assert!(err.to_string().contains("GRANT_TTL_SECONDS"));
    }

    #[test]
    fn test_non_numeric_duration_rejected() {
        let mut vars = base_vars();
        vars.insert("SESSION_CACHE_TTL_SECONDS".to_string(), "a day".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_local_domain_must_be_host() {
        let mut vars = base_vars();
        vars.insert(
            "LOCAL_DOMAIN".to_string(),
            "https://audon.example/".to_string(),
        );

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_bot_requires_both_values() {
        let mut vars = base_vars();
        vars.insert("BOT_SERVER".to_string(), "https://bots.example/".to_string());
        assert!(Config::from_vars(&vars).unwrap().bot.is_none());

        vars.insert("BOT_ACCESS_TOKEN".to_string(), "bot-token".to_string());
        let bot = Config::from_vars(&vars).unwrap().bot.unwrap();
        assert_eq!(bot.server, "https://bots.example");
        assert_eq!(bot.access_token.expose_secret(), "bot-token");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("BOT_SERVER".to_string(), "https://bots.example".to_string());
        vars.insert("BOT_ACCESS_TOKEN".to_string(), "bot-token".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("audon:pw"));
        assert!(!debug.contains("shhh-secret"));
        assert!(!debug.contains("bot-token"));
        assert!(debug.contains("audon.example"));
    }
}
