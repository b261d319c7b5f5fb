use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::connection::ReconnectPolicy;
use crate::transport::TransportConfig;
use crate::typing::DEFAULT_QUIET_INTERVAL;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_CACHE_DB: &str = "./nexus-cache.db";

/// Client settings, read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: Url,
    pub username: String,
    pub conversation_id: String,
    pub session_cookie: Option<String>,
    pub csrf_token: Option<String>,
    pub cache_db: PathBuf,
    pub reconnect: ReconnectPolicy,
    pub typing_quiet: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = server_url(&lookup)?;
        let username = lookup("NEXUS_USERNAME")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("NEXUS_USERNAME is required"))?;
        let conversation_id = lookup("NEXUS_CONVERSATION_ID")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("NEXUS_CONVERSATION_ID is required"))?;

        let defaults = ReconnectPolicy::default();
        let step = millis(&lookup, "NEXUS_RECONNECT_STEP_MS")?.unwrap_or(defaults.step());
        let max_attempts = match lookup("NEXUS_RECONNECT_MAX_ATTEMPTS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("NEXUS_RECONNECT_MAX_ATTEMPTS is not a number: {raw}"))?,
            None => defaults.max_attempts(),
        };

        Ok(Self {
            server_url,
            username: username.trim().to_string(),
            conversation_id: conversation_id.trim().to_string(),
            session_cookie: lookup("NEXUS_SESSION_COOKIE"),
            csrf_token: lookup("NEXUS_CSRF_TOKEN"),
            cache_db: cache_db(&lookup),
            reconnect: ReconnectPolicy::new(step, max_attempts),
            typing_quiet: millis(&lookup, "NEXUS_TYPING_QUIET_MS")?.unwrap_or(DEFAULT_QUIET_INTERVAL),
        })
    }

    /// Channel address for the configured conversation:
    /// `ws[s]://host/ws/chat/<conversation>/`.
    pub fn channel_url(&self) -> Result<Url> {
        let mut url = self
            .server_url
            .join(&format!("/ws/chat/{}/", self.conversation_id))?;
        let scheme = if self.server_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive channel url from {}", self.server_url))?;
        Ok(url)
    }

    pub fn transport(&self) -> Result<TransportConfig> {
        Ok(TransportConfig {
            address: self.channel_url()?,
            cookie: self.session_cookie.clone(),
            policy: self.reconnect,
        })
    }
}

/// Settings for the `nexus-cache` worker, which needs no chat identity.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub origin: Url,
    pub cache_db: PathBuf,
}

impl CacheConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            origin: server_url(&lookup)?,
            cache_db: cache_db(&lookup),
        })
    }
}

fn server_url<F>(lookup: &F) -> Result<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup("NEXUS_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
    let url = Url::parse(&raw).with_context(|| format!("NEXUS_SERVER_URL is not a valid url: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("NEXUS_SERVER_URL must be http or https"));
    }
    Ok(url)
}

fn cache_db<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("NEXUS_CACHE_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DB))
}

fn millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("{key} is not a number of milliseconds: {raw}"))
        })
        .transpose()
}
