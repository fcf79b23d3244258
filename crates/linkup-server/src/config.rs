use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// How long an empty meeting room keeps its chat buffer
    pub room_grace: Duration,
    /// How long after sending a message its sender may edit it
    pub edit_window: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key: &str| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("LINKUP_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("LINKUP_JWT_SECRET is unset or still a placeholder");
        }

        let host = get("LINKUP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("LINKUP_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("LINKUP_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", host, port))?;

        let db_path = get("LINKUP_DB_PATH").unwrap_or_else(|| "linkup.db".into()).into();

        let room_grace = secs(&get, "LINKUP_ROOM_GRACE_SECS", 30)?;
        let edit_window = secs(&get, "LINKUP_EDIT_WINDOW_SECS", 15 * 60)?;

        Ok(Self {
            addr,
            db_path,
            jwt_secret,
            room_grace,
            edit_window,
        })
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    match get(key) {
        Some(v) => {
            let n: u64 = v.parse().with_context(|| format!("{} must be a number of seconds", key))?;
            Ok(Duration::from_secs(n))
        }
        None => Ok(Duration::from_secs(default)),
    }
}
