use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [upstream]
//                    model = "mistral:latest"
//
//   env var:         RELAY_UPSTREAM__MODEL=mistral:latest
//                    (double underscore = nesting)
//
//   CLI:             --host / --port override the [server] section

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub upstream: UpstreamFileConfig,
}

/// Listen-address tunables (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Generation-service tunables (lives under `[upstream]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamFileConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Connect timeout for the upstream HTTP client. The streaming
    /// read itself has no timeout; generation can legitimately be
    /// slow and stops are driven by cancellation.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamFileConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            model: default_model(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_upstream_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "mistral:latest".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}

/// Build a figment that layers: struct defaults → config.toml → RELAY_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("RELAY_").split("__"))
}

/// Resolved runtime configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub data_dir: PathBuf,
    pub server: ServerFileConfig,
    pub upstream: UpstreamFileConfig,
}

impl RelayConfig {
    /// Load configuration from the data dir, applying CLI overrides.
    pub fn load(
        data_dir: Option<PathBuf>,
        host_override: Option<String>,
        port_override: Option<u16>,
    ) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("could not determine home directory")?
                .join(".chat-relay"),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        let mut file_config: FileConfig = load_config(&data_dir)
            .extract()
            .context("invalid configuration")?;

        if let Some(host) = host_override {
            file_config.server.host = host;
        }
        if let Some(port) = port_override {
            file_config.server.port = port;
        }
        file_config.upstream.url = file_config.upstream.url.trim_end_matches('/').to_string();

        Ok(Self {
            data_dir,
            server: file_config.server,
            upstream: file_config.upstream,
        })
    }
}
