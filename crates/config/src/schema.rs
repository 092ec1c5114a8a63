use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub session: SessionConfig,
    pub heartbeat: HeartbeatConfig,
    pub auth: AuthConfig,
}

/// Listener address for the HTTP/WebSocket surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL shared by the relational stores and the
    /// durable stream queue.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://murmur.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// Durable stream queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Consumer group name used by conversation workers.
    pub consumer_group: String,
    /// Approximate per-conversation stream cap; older entries are trimmed.
    pub stream_cap: i64,
    /// Redeliveries before an entry is parked as a dead letter.
    pub max_deliveries: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            consumer_group: "conversation-workers".into(),
            stream_cap: 1000,
            max_deliveries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds since `last_seen_at` within which a reconnecting user keeps
    /// their prior sender id.
    pub rejoin_window_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rejoin_window_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Fast timer: volatile presence refresh.
    pub fast_secs: u64,
    /// Slow timer: durable `last_seen_at` flush.
    pub slow_secs: u64,
    /// TTL handed to the presence index on each fast tick.
    pub online_ttl_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            fast_secs: 30,
            slow_secs: 120,
            online_ttl_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC-SHA-256 signing secret for issued tokens.
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub token_ttl_secs: i64,
    /// Static OTP code accepted by the dev provider. Leave unset in
    /// production deployments that wire a real verification provider.
    pub dev_otp_code: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: 86_400,
            dev_otp_code: None,
        }
    }
}
