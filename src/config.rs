//! Runtime configuration for the dispatcher, HTTP layer and remote-object
//! components.
//!
//! Every knob is a plain struct field with a `Default` and an optional
//! `OBJGATE_*` environment override. Configuration is read once at
//! construction; none of these structs are consulted through globals.

use std::env;
use std::time::Duration;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Policy knobs for the connection dispatcher's worker pool.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Workers pre-spawned at start and kept alive through idle periods.
    pub min_workers: usize,
    /// Hard cap on simultaneously existing workers.
    pub max_workers: usize,
    /// Idle time after which a worker beyond `min_workers` retires.
    pub worker_max_idle: Duration,
    /// Connections queued while all workers are busy; beyond this the busy
    /// handler rejects the connection.
    pub max_pending_connections: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 10,
            worker_max_idle: Duration::from_secs(20),
            max_pending_connections: 16,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from `OBJGATE_*` environment variables, falling
    /// back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_workers: env_usize("OBJGATE_MIN_WORKERS", d.min_workers),
            max_workers: env_usize("OBJGATE_MAX_WORKERS", d.max_workers),
            worker_max_idle: env_millis("OBJGATE_WORKER_MAX_IDLE_MS", d.worker_max_idle),
            max_pending_connections: env_usize(
                "OBJGATE_MAX_PENDING_CONNECTIONS",
                d.max_pending_connections,
            ),
        }
    }
}

/// Limits and timeouts for a single HTTP connection.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Maximum size of a raw header block in bytes.
    pub header_size_limit: usize,
    /// Maximum header plus declared body size in bytes.
    pub message_size_limit: usize,
    /// How long a blocking read may wait before giving up.
    pub read_timeout: Duration,
    /// How long a blocking write may wait before giving up.
    pub write_timeout: Duration,
    /// Per-request wall-clock budget enforced by the router; zero means
    /// unlimited. A channel push lifts this for its own request.
    pub max_connection_time: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            header_size_limit: 8 * 1024,
            message_size_limit: 8 * 1024 * 1024,
            read_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(20),
            max_connection_time: Duration::ZERO,
        }
    }
}

impl HttpConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            header_size_limit: env_usize("OBJGATE_HEADER_SIZE_LIMIT", d.header_size_limit),
            message_size_limit: env_usize("OBJGATE_MESSAGE_SIZE_LIMIT", d.message_size_limit),
            read_timeout: env_millis("OBJGATE_READ_TIMEOUT_MS", d.read_timeout),
            write_timeout: env_millis("OBJGATE_WRITE_TIMEOUT_MS", d.write_timeout),
            max_connection_time: env_millis("OBJGATE_MAX_CONNECTION_TIME_MS", d.max_connection_time),
        }
    }
}

/// Lifecycle limits for a remote-object server.
#[derive(Debug, Clone)]
pub struct RemoteServerConfig {
    /// A channel idle (not being pushed) longer than this is collected.
    pub channel_timeout: Duration,
    /// An instance unused longer than this is collected (multi-instance mode).
    pub instance_timeout: Duration,
    /// Maximum concurrently live instances (multi-instance mode).
    pub max_instances: usize,
}

impl Default for RemoteServerConfig {
    fn default() -> Self {
        Self {
            channel_timeout: Duration::from_secs(30),
            instance_timeout: Duration::from_secs(60),
            max_instances: 100,
        }
    }
}

impl RemoteServerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            channel_timeout: env_millis("OBJGATE_CHANNEL_TIMEOUT_MS", d.channel_timeout),
            instance_timeout: env_millis("OBJGATE_INSTANCE_TIMEOUT_MS", d.instance_timeout),
            max_instances: env_usize("OBJGATE_MAX_INSTANCES", d.max_instances),
        }
    }
}

/// Connection and retry policy for a remote-object client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for establishing a connection to the server.
    pub connection_timeout: Duration,
    /// Reconnect attempts for the channel thread before giving up.
    pub retry_count: u32,
    /// Delay between channel reconnect attempts.
    pub retry_delay: Duration,
    /// How long `connect_signal` waits for the channel thread to report
    /// that the channel is open.
    pub channel_open_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
            retry_count: 2,
            retry_delay: Duration::from_secs(1),
            channel_open_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            connection_timeout: env_millis("OBJGATE_CONNECTION_TIMEOUT_MS", d.connection_timeout),
            retry_count: env_usize("OBJGATE_RETRY_COUNT", d.retry_count as usize) as u32,
            retry_delay: env_millis("OBJGATE_RETRY_DELAY_MS", d.retry_delay),
            channel_open_timeout: env_millis(
                "OBJGATE_CHANNEL_OPEN_TIMEOUT_MS",
                d.channel_open_timeout,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.max_pending_connections, 16);
    }

    #[test]
    fn http_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.header_size_limit, 8 * 1024);
        assert!(config.max_connection_time.is_zero());
    }
}
