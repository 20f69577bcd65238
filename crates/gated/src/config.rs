use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration.
///
/// Built from defaults, then the TOML file named by `GATE_CONFIG` (if any),
/// then `GATE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address for the HTTP endpoint.
    pub bind: SocketAddr,
    /// Encoding database directory.
    pub db_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Embedding service endpoint (multipart `image` in, face embeddings out).
    pub embedder_url: String,
    pub embedder_timeout_secs: u64,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    pub broker: BrokerSettings,
    pub controller: ControllerSettings,
}

/// MQTT broker channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u64,
    /// Delay before the client reconnects after a failure; 0 never retries.
    pub reconnect_secs: u64,
}

/// Door controller HTTP channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSettings {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            db_dir: gate_core::default_db_dir(),
            similarity_threshold: 0.40,
            embedder_url: "http://127.0.0.1:9000/embed".to_string(),
            embedder_timeout_secs: 10,
            max_upload_bytes: 10 * 1024 * 1024,
            broker: BrokerSettings::default(),
            controller: ControllerSettings::default(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 1883,
            client_id: "gated".to_string(),
            topic: "esp32/door".to_string(),
            keep_alive_secs: 30,
            reconnect_secs: 5,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            url: "http://192.168.1.17:80/face_recognition".to_string(),
            timeout_secs: 5,
        }
    }
}

impl BrokerSettings {
    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_secs > 0).then(|| Duration::from_secs(self.reconnect_secs))
    }
}

impl ControllerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load the file named by `GATE_CONFIG` (if set), then apply env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("GATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        Self::from_toml(&text).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `GATE_*` environment variables.
    pub fn apply_env(&mut self) {
        self.bind = env_or("GATE_BIND", self.bind);
        self.db_dir = std::env::var("GATE_DB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.db_dir.clone());
        self.similarity_threshold = env_or("GATE_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.embedder_url = env_or("GATE_EMBEDDER_URL", self.embedder_url.clone());
        self.embedder_timeout_secs = env_or("GATE_EMBEDDER_TIMEOUT_SECS", self.embedder_timeout_secs);
        self.max_upload_bytes = env_or("GATE_MAX_UPLOAD_BYTES", self.max_upload_bytes);

        let broker = &mut self.broker;
        broker.host = env_or("GATE_BROKER_HOST", broker.host.clone());
        broker.port = env_or("GATE_BROKER_PORT", broker.port);
        broker.client_id = env_or("GATE_BROKER_CLIENT_ID", broker.client_id.clone());
        broker.topic = env_or("GATE_BROKER_TOPIC", broker.topic.clone());
        broker.keep_alive_secs = env_or("GATE_BROKER_KEEP_ALIVE_SECS", broker.keep_alive_secs);
        broker.reconnect_secs = env_or("GATE_BROKER_RECONNECT_SECS", broker.reconnect_secs);

        let controller = &mut self.controller;
        controller.url = env_or("GATE_CONTROLLER_URL", controller.url.clone());
        controller.timeout_secs = env_or("GATE_CONTROLLER_TIMEOUT_SECS", controller.timeout_secs);
    }

    pub fn embedder_timeout(&self) -> Duration {
        Duration::from_secs(self.embedder_timeout_secs)
    }
}

/// Parsed env var, or `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable environment override");
            default
        }),
        Err(_) => default,
    }
}
