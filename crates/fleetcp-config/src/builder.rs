//! Configuration builder for flexible configuration loading

use crate::{Config, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Configuration builder for loading configuration from multiple sources
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
    env_separator: String,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
            env_separator: "__".to_string(),
        }
    }

    /// Add a configuration file source
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Set environment variable separator (default: "__")
    pub fn env_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.env_separator = separator.into();
        self
    }

    /// Build the configuration
    pub fn build(mut self) -> ConfigResult<Config> {
        // Defaults form the base layer; files and environment override it
        let defaults = Config::default();
        let defaults_value = serde_yaml::to_value(&defaults)
            .map_err(|e| ConfigError::other(format!("Failed to serialize defaults: {}", e)))?;
        self.inner = self
            .inner
            .add_source(config::Config::try_from(&defaults_value)?);

        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix).separator(&self.env_separator),
                    );
                }
            }
        }

        let config = self.inner.build()?;
        let result: Config = config.try_deserialize()?;

        Self::validate(&result)?;

        Ok(result)
    }

    /// Try to build the configuration, returning defaults on error
    pub fn build_or_default(self) -> Config {
        self.build().unwrap_or_default()
    }

    /// Detect file format from extension
    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }

    /// Validate the configuration
    fn validate(config: &Config) -> ConfigResult<()> {
        if config.control.address.trim().is_empty() {
            return Err(ConfigError::missing_required("control.address"));
        }

        if config.transfer.max_workers == 0 {
            return Err(ConfigError::validation(
                "transfer.max_workers must be greater than 0",
            ));
        }

        if config.transfer.batch_max_files < 2 {
            return Err(ConfigError::validation(
                "transfer.batch_max_files must be at least 2",
            ));
        }

        if config.transfer.command_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "transfer.command_timeout_secs must be greater than 0",
            ));
        }

        if config.pool.max_sessions_per_host == 0 {
            return Err(ConfigError::validation(
                "pool.max_sessions_per_host must be greater than 0",
            ));
        }

        if config.cache.ttl_secs == 0 {
            return Err(ConfigError::validation(
                "cache.ttl_secs must be greater than 0",
            ));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "logging.level must be one of: trace, debug, info, warn, error",
            ));
        }

        let mut names = HashSet::new();
        for server in &config.servers {
            if server.name.trim().is_empty() || server.address.trim().is_empty() {
                return Err(ConfigError::validation(
                    "every server needs a non-empty name and address",
                ));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::validation(format!(
                    "duplicate server name: {}",
                    server.name
                )));
            }
            if server.password.is_none() && server.key_path.is_none() {
                return Err(ConfigError::validation(format!(
                    "server {} needs a password or a key_path",
                    server.name
                )));
            }
        }

        Ok(())
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
