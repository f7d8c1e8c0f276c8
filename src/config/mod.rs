use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub learn: LearnConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Rules the course engine applies. Built once at startup and handed to the engine;
/// the engine itself never reads the environment.
#[derive(Clone, Serialize, Deserialize)]
pub struct LearnConfig {
    pub pass_percent: u32,
    pub retry_cooldown_seconds: i64,
    pub introduction_title: String,
    #[serde(skip_serializing)]
    pub master_password: Option<String>,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            pass_percent: 60,
            retry_cooldown_seconds: 300,
            introduction_title: "Introduction".to_string(),
            master_password: None,
        }
    }
}

impl std::fmt::Debug for LearnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnConfig")
            .field("pass_percent", &self.pass_percent)
            .field("retry_cooldown_seconds", &self.retry_cooldown_seconds)
            .field("introduction_title", &self.introduction_title)
            .field(
                "master_password",
                &self.master_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl LearnConfig {
    pub fn with_master_password(mut self, password: impl Into<String>) -> Self {
        self.master_password = Some(password.into());
        self
    }

    pub fn retry_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_cooldown_seconds)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let defaults = LearnConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 8080)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            learn: LearnConfig {
                pass_percent: parse_var("LEARN_PASS_PERCENT", defaults.pass_percent)?,
                retry_cooldown_seconds: parse_var(
                    "LEARN_RETRY_COOLDOWN_SECONDS",
                    defaults.retry_cooldown_seconds,
                )?,
                introduction_title: env::var("LEARN_INTRODUCTION_TITLE")
                    .unwrap_or(defaults.introduction_title),
                master_password: env::var("LEARN_MASTER_PASSWORD")
                    .ok()
                    .filter(|p| !p.is_empty()),
            },
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}
