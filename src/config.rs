//! Configuration file loading for the CLI.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use citetrack_core::completion::{DEFAULT_MAX_RETRIES, RateLimiter};
use citetrack_core::provider::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_TOKENS, DEFAULT_READ_TIMEOUT_SECS,
    DEFAULT_TEMPERATURE, HttpTimeouts, Provider, ProviderCallConfig, ProviderError,
};
use serde::Deserialize;

/// Database file used when the config does not name one.
pub const DEFAULT_DATABASE_PATH: &str = "citetrack.db";

/// TOML-backed file configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// SQLite database file.
    pub database_path: Option<PathBuf>,
    /// Total attempts per provider call (1..=10).
    pub max_retries: Option<u32>,
    /// Provider client connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Provider client whole-request timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Per-provider overrides keyed by provider label.
    #[serde(default)]
    pub providers: BTreeMap<Provider, ProviderSettings>,
}

/// `[providers.<name>]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    pub model: Option<String>,
    /// Inline key. Prefer `api_key_env` or `.env`.
    pub api_key: Option<String>,
    /// Environment variable holding the key.
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub requests_per_minute: Option<u32>,
    /// ISO country code for approximate user location.
    pub region: Option<String>,
    /// Alternative API endpoint, mostly for proxies and tests.
    pub base_url: Option<String>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(max_retries) = self.max_retries
            && !(1..=10).contains(&max_retries)
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 1..=10");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;

        for (provider, settings) in &self.providers {
            settings
                .validate()
                .with_context(|| format!("Invalid [providers.{provider}] section"))?;
        }
        Ok(())
    }

    /// Database path, falling back to `citetrack.db` in the working directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH))
    }

    /// Attempt budget for the retrying caller.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// Provider client timeouts.
    #[must_use]
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout_secs: self.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
        }
    }

    /// Rate limiter with default ceilings and any configured overrides.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        self.providers
            .iter()
            .filter_map(|(provider, settings)| {
                settings.requests_per_minute.map(|rpm| (*provider, rpm))
            })
            .fold(RateLimiter::with_default_ceilings(), |limiter, (provider, rpm)| {
                limiter.with_ceiling(provider, rpm)
            })
    }

    /// Settings for `provider`, empty when the section is absent.
    #[must_use]
    pub fn provider_settings(&self, provider: Provider) -> ProviderSettings {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }

    /// Builds the call config for `provider`, reading its key from the environment.
    pub fn provider_call_config(
        &self,
        provider: Provider,
    ) -> Result<ProviderCallConfig, ProviderError> {
        self.provider_call_config_with(provider, |name| env::var(name).ok())
    }

    fn provider_call_config_with(
        &self,
        provider: Provider,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ProviderCallConfig, ProviderError> {
        let settings = self.provider_settings(provider);
        let env_var = settings
            .api_key_env
            .clone()
            .unwrap_or_else(|| provider.default_api_key_env().to_string());

        let api_key = settings
            .api_key
            .clone()
            .or_else(|| lookup(&env_var))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::missing_api_key(provider, &env_var))?;

        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());

        let mut config = ProviderCallConfig::new(api_key, model)
            .with_temperature(settings.temperature.unwrap_or(DEFAULT_TEMPERATURE))
            .with_max_tokens(settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        if let Some(region) = settings.region {
            config = config.with_region(region);
        }
        Ok(config)
    }
}

impl ProviderSettings {
    fn validate(&self) -> Result<()> {
        if let Some(rpm) = self.requests_per_minute
            && !(1..=10_000).contains(&rpm)
        {
            bail!("Invalid config value for `requests_per_minute`: {rpm}. Expected range: 1..=10000");
        }
        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            bail!("Invalid config value for `temperature`: {temperature}. Expected range: 0.0..=2.0");
        }
        if self.max_tokens == Some(0) {
            bail!("Invalid config value for `max_tokens`: 0. Expected range: 1..");
        }
        if let Some(model) = &self.model
            && model.trim().is_empty()
        {
            bail!("Invalid config value for `model`: must not be empty");
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if one is known.
    pub path: Option<PathBuf>,
    /// Parsed config, or defaults when no file exists.
    pub config: FileConfig,
    /// Whether configuration was read from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/citetrack/config.toml`
/// 2. `$HOME/.config/citetrack/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("citetrack")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("citetrack")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit` (which must exist), else the default path if present.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Config file '{}' does not exist", path.display());
        }
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: load_file_config(path)?,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(default_path) if default_path.exists() => Ok(LoadedConfig {
            config: load_file_config(default_path)?,
            path,
            loaded_from_file: true,
        }),
        _ => Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        }),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}
