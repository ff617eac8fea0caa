use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::BaseDirs;
use log::info;
use serde::{Deserialize, Serialize};

use crate::api::Gateway;
use crate::api::client::EvolutionClient;
use crate::api::models::HistoryQuery;
use crate::conversation::ConversationView;
use crate::directory::ContactDirectory;
use crate::error::{ConfigError, StoreError};
use crate::storage::Store;
use crate::storage::sqlite::{self, SqliteStore};
use crate::storage::supabase::SupabaseStore;
use crate::utils::normalize_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Supabase,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub instance: String,
    pub api_key: String,
    pub history_limit: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            instance: String::new(),
            api_key: String::new(),
            history_limit: HistoryQuery::default().limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub url: String,
    pub api_key: String,
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("evolution-chat.toml"))
    }

    /// Reads `path`, or the default location. A missing file yields defaults;
    /// environment variables override whatever the file says.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path().ok_or(ConfigError::NoConfigDir)?,
        };
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 5] = [
            ("EVOLUTION_URL", &mut self.gateway.base_url),
            ("EVOLUTION_INSTANCE", &mut self.gateway.instance),
            ("EVOLUTION_API_KEY", &mut self.gateway.api_key),
            ("SUPABASE_URL", &mut self.store.url),
            ("SUPABASE_KEY", &mut self.store.api_key),
        ];
        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("gateway.base_url", &self.gateway.base_url),
            ("gateway.instance", &self.gateway.instance),
            ("gateway.api_key", &self.gateway.api_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        url::Url::parse(&normalize_url(&self.gateway.base_url))
            .map_err(|_| ConfigError::InvalidUrl(self.gateway.base_url.clone()))?;
        if self.store.backend == Backend::Supabase {
            if self.store.url.trim().is_empty() {
                return Err(ConfigError::Missing("store.url"));
            }
            if self.store.api_key.trim().is_empty() {
                return Err(ConfigError::Missing("store.api_key"));
            }
            url::Url::parse(&normalize_url(&self.store.url))
                .map_err(|_| ConfigError::InvalidUrl(self.store.url.clone()))?;
        }
        Ok(())
    }

    pub fn history_query(&self) -> HistoryQuery {
        HistoryQuery {
            limit: self.gateway.history_limit,
            ..HistoryQuery::default()
        }
    }

    pub fn open_store(&self) -> Result<Arc<dyn Store>, StoreError> {
        match self.store.backend {
            Backend::Supabase => Ok(Arc::new(SupabaseStore::new(&self.store.url, &self.store.api_key))),
            Backend::Sqlite => {
                let path = self
                    .store
                    .sqlite_path
                    .clone()
                    .or_else(sqlite::default_db_path)
                    .ok_or(StoreError::NoDataDir)?;
                info!("using local store at {}", path.display());
                Ok(Arc::new(SqliteStore::open(&path)?))
            }
        }
    }

    pub fn gateway(&self) -> Arc<dyn Gateway> {
        Arc::new(EvolutionClient::new(
            &self.gateway.base_url,
            &self.gateway.instance,
            &self.gateway.api_key,
        ))
    }
}

/// Wires the directory and the conversation view to the configured services
/// and runs the terminal client until the user quits.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let store = config.open_store()?;
    let gateway = config.gateway();
    let directory = ContactDirectory::new(store.clone());
    let view = ConversationView::new(store, gateway).with_history_query(config.history_query());
    crate::ui::main_window::run(directory, view).await
}
