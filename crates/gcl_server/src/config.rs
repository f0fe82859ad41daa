//! Server configuration.

use crate::error::{ServerError, ServerResult};
use crate::replica::ReplicaEndpoint;
use gcl_core::{Name, ServerId, SignaturePolicy, StoreConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Replication settings.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Replica acknowledgments required before replying to the writer.
    pub quorum: usize,
    /// How long a request may wait for acknowledgments.
    pub ack_timeout: Duration,
    /// Replica set given to logs that have none.
    pub default_replicas: Vec<ReplicaEndpoint>,
    /// How often timed-out requests are reaped.
    pub reap_interval: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            quorum: 1,
            ack_timeout: Duration::from_secs(10),
            default_replicas: Vec::new(),
            reap_interval: Duration::from_secs(1),
        }
    }
}

impl ReplicationConfig {
    /// Configuration for a server that is its own only replica.
    #[must_use]
    pub fn standalone(local: ServerId, addr: SocketAddr) -> Self {
        Self {
            default_replicas: vec![ReplicaEndpoint::new(local, addr.to_string())],
            ..Self::default()
        }
    }

    /// Sets the quorum.
    #[must_use]
    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    /// Sets the acknowledgment timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the default replica set.
    #[must_use]
    pub fn with_replicas(mut self, replicas: Vec<ReplicaEndpoint>) -> Self {
        self.default_replicas = replicas;
        self
    }

    /// Sets the reaper interval.
    #[must_use]
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }
}

/// Configuration for the log server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// This server's identity.
    pub local_name: ServerId,
    /// Store settings, including the log directory.
    pub store: StoreConfig,
    /// Replication settings.
    pub replication: ReplicationConfig,
    /// How record signatures are checked on publish.
    pub signature_policy: SignaturePolicy,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time a connection waits for a deferred reply.
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            local_name: Name::hash_of(bind_addr.to_string().as_bytes()),
            store: StoreConfig::default(),
            replication: ReplicationConfig::default(),
            signature_policy: SignaturePolicy::default(),
            max_connections: 1000,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the server identity.
    #[must_use]
    pub fn with_local_name(mut self, name: ServerId) -> Self {
        self.local_name = name;
        self
    }

    /// Sets the store configuration.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Sets the log directory.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.store = self.store.log_dir(dir);
        self
    }

    /// Sets the replication configuration.
    #[must_use]
    pub fn with_replication(mut self, replication: ReplicationConfig) -> Self {
        self.replication = replication;
        self
    }

    /// Sets the signature policy.
    #[must_use]
    pub fn with_signature_policy(mut self, policy: SignaturePolicy) -> Self {
        self.signature_policy = policy;
        self
    }

    /// Sets the maximum concurrent connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builds a configuration from admin parameters.
    ///
    /// Without `gcl.replication.replicas` the server replicates only to
    /// itself.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an unparsable bind address or
    /// replica list.
    pub fn from_params(params: &dyn ParamSource) -> ServerResult<Self> {
        let defaults = Self::default();
        let bind = params.string("gcl.server.bind", &defaults.bind_addr.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .map_err(|_| ServerError::config(format!("invalid gcl.server.bind {bind:?}")))?;

        let mut config = Self::new(bind_addr);
        if let Some(name) = params.get("gcl.server.name") {
            config.local_name = Name::parse(&name);
        }

        let store = StoreConfig::default()
            .log_dir(params.string("gcl.log.dir", "gcls"))
            .index_cache_capacity(params.uint("gcl.index.cache-size", defaults.store.index_cache_capacity))
            .max_record_size(params.uint("gcl.record.max-size", defaults.store.max_record_size))
            .sync_on_append(params.bool("gcl.log.sync", defaults.store.sync_on_append));
        config.store = store;

        let replicas = match params.get("gcl.replication.replicas") {
            Some(list) => parse_replicas(&list)?,
            None => vec![ReplicaEndpoint::new(config.local_name, bind_addr.to_string())],
        };
        config.replication = ReplicationConfig::default()
            .with_quorum(params.uint("gcl.replication.quorum", 1))
            .with_ack_timeout(params.duration("gcl.replication.ack-timeout", defaults.replication.ack_timeout))
            .with_reap_interval(params.duration("gcl.replication.reap-interval", defaults.replication.reap_interval))
            .with_replicas(replicas);

        config.signature_policy = match params.string("gcl.signature.policy", "ignore").as_str() {
            "ignore" => SignaturePolicy::Ignore,
            "verify" => SignaturePolicy::VerifyIfPresent,
            "require" => SignaturePolicy::Required,
            other => {
                return Err(ServerError::config(format!(
                    "invalid gcl.signature.policy {other:?}"
                )))
            }
        };
        config.max_connections = params.uint("gcl.server.max-connections", defaults.max_connections);
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8007)))
    }
}

/// Parses a comma-separated `name@host:port` replica list.
///
/// # Errors
///
/// Returns [`ServerError::Config`] for an entry without `@` or a port.
pub fn parse_replicas(list: &str) -> ServerResult<Vec<ReplicaEndpoint>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, addr) = entry
                .split_once('@')
                .ok_or_else(|| ServerError::config(format!("replica {entry:?} is not name@host:port")))?;
            if name.is_empty() || !addr.contains(':') {
                return Err(ServerError::config(format!(
                    "replica {entry:?} is not name@host:port"
                )));
            }
            Ok(ReplicaEndpoint::new(Name::parse(name), addr.to_string()))
        })
        .collect()
}

/// Key/value administrative parameters.
///
/// Typed lookups fall back to the default when a key is missing or its
/// value does not parse.
pub trait ParamSource: Send + Sync {
    /// Raw value of `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// String value of `key`.
    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Integer value of `key`.
    fn int(&self, key: &str, default: i64) -> i64 {
        parse_or(self.get(key), key, default, |v| v.parse().ok())
    }

    /// Non-negative integer value of `key`.
    fn uint(&self, key: &str, default: usize) -> usize {
        parse_or(self.get(key), key, default, |v| v.parse().ok())
    }

    /// Boolean value of `key`. Accepts `true/false`, `yes/no`, `on/off`, `1/0`.
    fn bool(&self, key: &str, default: bool) -> bool {
        parse_or(self.get(key), key, default, |v| {
            match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            }
        })
    }

    /// Duration value of `key`: `250ms`, `5s`, `2m`, or bare seconds.
    fn duration(&self, key: &str, default: Duration) -> Duration {
        parse_or(self.get(key), key, default, parse_duration)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match value {
        None => default,
        Some(raw) => match parse(raw.trim()) {
            Some(v) => v,
            None => {
                warn!(key, value = %raw, "unparsable parameter, using default");
                default
            }
        },
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.trim().parse().ok().map(Duration::from_secs);
    }
    if let Some(mins) = value.strip_suffix('m') {
        return mins
            .trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60));
    }
    value.parse().ok().map(Duration::from_secs)
}

/// In-memory parameter map.
#[derive(Debug, Clone, Default)]
pub struct MapParams {
    values: HashMap<String, String>,
}

impl MapParams {
    /// Creates an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Parses a TOML parameter document.
    ///
    /// Tables flatten into dotted keys, so `[gcl.server] bind = "..."` and
    /// `gcl.server.bind = "..."` are the same parameter. Arrays join with
    /// commas.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the text is not valid TOML.
    pub fn parse(text: &str) -> ServerResult<Self> {
        let table: toml::Table =
            toml::from_str(text).map_err(|e| ServerError::config(e.to_string()))?;
        let mut values = HashMap::new();
        flatten_table(None, &table, &mut values);
        Ok(Self { values })
    }

    /// Reads and parses a parameter file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn flatten_table(prefix: Option<&str>, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let key = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            toml::Value::Table(inner) => flatten_table(Some(&key), inner, out),
            other => {
                out.insert(key, scalar_text(other));
            }
        }
    }
}

fn scalar_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

impl ParamSource for MapParams {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
