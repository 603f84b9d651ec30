use authz_engine::EngineConfig;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration, layered from `config/default.toml`, an optional
/// `--config` file and `AUTHZ__`-prefixed environment variables
/// (e.g. `AUTHZ__BIND_ADDR`, `AUTHZ__CHECK__DEPTH_LIMIT`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// PostgreSQL URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub database_pool_size: u32,
    /// Fallback per-call deadline when the client sends none.
    pub request_timeout_secs: u64,
    pub check: CheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub depth_limit: u32,
    pub concurrency_limit: usize,
    pub max_write_batch: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:50051".to_string(),
            database_url: None,
            database_pool_size: 10,
            request_timeout_secs: 10,
            check: CheckConfig::default(),
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            depth_limit: engine.depth_limit,
            concurrency_limit: engine.concurrency_limit,
            max_write_batch: engine.max_write_batch,
            default_page_size: engine.default_page_size,
            max_page_size: engine.max_page_size,
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/default").required(false));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        let config = builder
            .add_source(Environment::with_prefix("AUTHZ").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            depth_limit: self.check.depth_limit,
            concurrency_limit: self.check.concurrency_limit,
            max_write_batch: self.check.max_write_batch,
            default_page_size: self.check.default_page_size,
            max_page_size: self.check.max_page_size,
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.bind_addr.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert!(config.socket_addr().is_ok());
        assert!(config.database_url.is_none());
        let engine = config.engine_config();
        assert_eq!(engine.depth_limit, 25);
        assert_eq!(engine.concurrency_limit, 32);
        assert_eq!(engine.max_write_batch, 100);
    }
}
