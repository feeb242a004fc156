use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::{KouriConfig, ProviderKind};

/// Loads and reloads the Kouri configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<KouriConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > KOURI_CONFIG env > ~/.kouri/kouri.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("KOURI_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kouri")
            .join("kouri.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> kouri_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            KouriConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader around an in-memory config (validated, no file behind it).
    pub fn from_config(config: KouriConfig) -> kouri_core::Result<Self> {
        Self::check(&config)?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> KouriConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<KouriConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> kouri_core::Result<KouriConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<KouriConfig>(&raw).map_err(|e| {
            kouri_core::KouriError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Validate, logging warnings and failing on errors.
    fn check(config: &KouriConfig) -> kouri_core::Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(kouri_core::KouriError::Config(e)),
        }
    }

    /// Apply env var overrides (KOURI_LOG_LEVEL, KOURI_MAX_PAIRS, etc.)
    fn apply_env_overrides(mut config: KouriConfig) -> KouriConfig {
        if let Ok(v) = std::env::var("KOURI_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("KOURI_MAX_PAIRS") {
            if let Ok(n) = v.parse::<usize>() {
                config.context.max_pairs = n;
            }
        }
        if let Ok(v) = std::env::var("KOURI_EMBEDDING_PROVIDER") {
            match v.to_lowercase().as_str() {
                "local" => config.embedding.provider = ProviderKind::Local,
                "remote" => config.embedding.provider = ProviderKind::Remote,
                other => warn!(value = other, "ignoring unknown KOURI_EMBEDDING_PROVIDER"),
            }
        }
        if let Ok(v) = std::env::var("KOURI_GENERATION_MODEL") {
            config.generation.model = v;
        }
        // API keys: env var fills in when the config file doesn't set one.
        let env_key = std::env::var("KOURI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        if let Some(key) = env_key {
            if config.generation.api_key.is_none() {
                config.generation.api_key = Some(key.clone());
            }
            if config.embedding.api_key.is_none() {
                config.embedding.api_key = Some(key);
            }
        }
        config
    }

    /// Reload the config from disk. The current config is kept if the new one is invalid.
    pub fn reload(&self) -> kouri_core::Result<()> {
        if !self.config_path.exists() {
            return Err(kouri_core::KouriError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
