use std::env;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const BIND_ADDR: &str = "BIND_ADDR";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const DATABASE_URL: &str = "./.db/botlog.db";
    pub const BIND_ADDR: &str = "0.0.0.0";
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: String,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var(env_vars::PORT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::PORT);

        let bind_addr = env::var(env_vars::BIND_ADDR)
            .unwrap_or_else(|_| defaults::BIND_ADDR.to_string());

        let database_url = env::var(env_vars::DATABASE_URL)
            .unwrap_or_else(|_| defaults::DATABASE_URL.to_string());

        Config {
            port,
            bind_addr,
            database_url,
        }
    }
}
