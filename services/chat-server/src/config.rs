//! Runtime configuration, loaded from the environment (optionally preloaded
//! from a `.env` file) with defaults matching the protocol's reference
//! constants.

use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub auth_timeout: Duration,
    pub worker_pool_size: usize,
}

impl Config {
    /// Loads configuration from the process environment, loading a `.env`
    /// file first if one is present in the working directory.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:54321"),
            database_url: env_or("DATABASE_URL", "sqlite:chat.db"),
            max_connections: env_parse_or("MAX_CONNECTIONS", 100),
            read_buffer_size: env_parse_or("READ_BUFFER_SIZE", 8192),
            ping_interval: Duration::from_secs(env_parse_or("PING_INTERVAL_SECS", 30)),
            ping_timeout: Duration::from_secs(env_parse_or("PING_TIMEOUT_SECS", 1800)),
            auth_timeout: Duration::from_secs(env_parse_or("AUTH_TIMEOUT_SECS", 60)),
            worker_pool_size: env_parse_or("WORKER_POOL_SIZE", 20),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:54321".to_owned(),
            database_url: "sqlite:chat.db".to_owned(),
            max_connections: 100,
            read_buffer_size: 8192,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_mins(30),
            auth_timeout: Duration::from_mins(1),
            worker_pool_size: 20,
        }
    }
}
