use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URI used when building resource locations. Defaults to
    /// `http://<host>:<port>`.
    #[serde(default)]
    pub base_uri: Option<String>,
}

/// Bulk limits applied at startup. A missing value means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    #[serde(default)]
    pub max_operations: Option<u64>,
    #[serde(default)]
    pub max_payload_size: Option<u64>,
    #[serde(default)]
    pub max_concurrent_requests: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            base_uri: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and
    /// `SCIM_` environment variables (e.g. `SCIM_BULK__MAX_OPERATIONS`).
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        config = config.add_source(
            config::Environment::with_prefix("SCIM")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn base_uri(&self) -> String {
        match &self.server.base_uri {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.server_address()),
        }
    }
}
