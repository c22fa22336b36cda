//! Redis client setup

use crate::error::KvError;
use redis::aio::ConnectionManager;

/// Connection settings for the shared key-value store
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl RedisConfig {
    /// Build the redis connection URL
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { host: "localhost".to_string(), port: 6379, password: String::new(), db: 0 }
    }
}

/// Open a managed connection (auto-reconnecting, cheaply cloneable).
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager, KvError> {
    let client = redis::Client::open(config.url())?;
    let manager = client.get_connection_manager().await?;
    Ok(manager)
}

/// Round-trip a PING; used by the readiness probe.
pub async fn ping(conn: &ConnectionManager) -> Result<(), KvError> {
    let mut conn = conn.clone();
    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    if pong != "PONG" {
        return Err(KvError::Backend(format!("Unexpected PING reply: {}", pong)));
    }
    Ok(())
}
