//! In-memory provider table backed by the on-disk store.
//!
//! The table lock is only held for map lookups and mutations. Each provider
//! sits behind its own async mutex, so a slow `get()` only blocks callers of
//! that provider.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use credctl_core::{Metadata, ProviderStore, ProviderSummary, StorageError, StoredProvider};
use credctl_providers::{Provider, ProviderError, Registry};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A live provider shared between connections.
pub type SharedProvider = Arc<Mutex<Box<dyn Provider>>>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("provider not found: {0}")]
    NotFound(String),

    #[error("provider name cannot be empty")]
    EmptyName,

    #[error("provider type cannot be empty")]
    EmptyType,

    /// The registry could not construct the provider type.
    #[error("{0}")]
    Create(#[source] ProviderError),

    /// The provider rejected its configuration.
    #[error("{0}")]
    Init(#[source] ProviderError),

    #[error("provider '{name}' does not support {capability}")]
    Unsupported {
        name: String,
        capability: &'static str,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
struct Entry {
    provider_type: String,
    provider: SharedProvider,
}

/// Daemon state: provider name to live provider.
pub struct State {
    providers: RwLock<HashMap<String, Entry>>,
    store: ProviderStore,
    registry: Arc<Registry>,
}

impl State {
    pub fn new(store: ProviderStore, registry: Arc<Registry>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            store,
            registry,
        }
    }

    pub fn store(&self) -> &ProviderStore {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Load every persisted provider. Records that fail to load or
    /// initialize are logged and skipped. Returns the number loaded.
    pub async fn load_all(&self) -> Result<usize, StateError> {
        let names = self.store.list()?;
        let mut loaded = HashMap::new();

        for name in names {
            match self.build_from_disk(&name).await {
                Ok(entry) => {
                    debug!(name = %name, provider_type = %entry.provider_type, "Loaded provider");
                    loaded.insert(name, entry);
                }
                Err(e) => warn!(name = %name, error = %e, "Skipping provider that failed to load"),
            }
        }

        let count = loaded.len();
        self.providers.write().await.extend(loaded);
        info!(count = count, "Loaded providers from disk");
        Ok(count)
    }

    /// Construct, initialize and persist a provider, then publish it.
    ///
    /// The record is written before the in-memory table is touched. With
    /// `force`, an existing provider of the same name is replaced.
    pub async fn add(
        &self,
        name: &str,
        provider_type: &str,
        metadata: &Metadata,
        force: bool,
    ) -> Result<(), StateError> {
        if name.is_empty() {
            return Err(StateError::EmptyName);
        }
        if provider_type.is_empty() {
            return Err(StateError::EmptyType);
        }
        ProviderStore::validate_name(name)?;

        let mut provider = self
            .registry
            .create(provider_type)
            .map_err(StateError::Create)?;
        provider
            .schema()
            .validate(metadata)
            .map_err(|e| StateError::Init(e.into()))?;
        provider.init(metadata).await.map_err(StateError::Init)?;

        let record = StoredProvider::new(name, provider_type, provider.metadata());

        let mut providers = self.providers.write().await;
        self.store.save(&record, force)?;
        providers.insert(
            name.to_string(),
            Entry {
                provider_type: provider_type.to_string(),
                provider: Arc::new(Mutex::new(provider)),
            },
        );

        info!(name = %name, provider_type = %provider_type, force = force, "Added provider");
        Ok(())
    }

    /// Look up a provider, falling back to the store on a memory miss.
    ///
    /// A provider loaded from disk is kept in memory so that tokens it
    /// acquires survive until the daemon exits.
    pub async fn get(&self, name: &str) -> Result<(String, SharedProvider), StateError> {
        if let Some(entry) = self.providers.read().await.get(name) {
            return Ok((entry.provider_type.clone(), Arc::clone(&entry.provider)));
        }

        let entry = self.build_from_disk(name).await?;
        let mut providers = self.providers.write().await;
        let entry = providers.entry(name.to_string()).or_insert(entry);
        debug!(name = %name, "Loaded provider from disk on demand");
        Ok((entry.provider_type.clone(), Arc::clone(&entry.provider)))
    }

    /// Remove a provider from disk, then from memory.
    pub async fn delete(&self, name: &str) -> Result<(), StateError> {
        if name.is_empty() {
            return Err(StateError::EmptyName);
        }

        let mut providers = self.providers.write().await;
        match self.store.delete(name) {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) if providers.contains_key(name) => {}
            Err(StorageError::NotFound(_)) => return Err(StateError::NotFound(name.to_string())),
            Err(e) => return Err(e.into()),
        }
        providers.remove(name);

        info!(name = %name, "Deleted provider");
        Ok(())
    }

    /// All known providers, sorted by name.
    pub async fn list(&self) -> Result<Vec<ProviderSummary>, StateError> {
        let mut summaries: BTreeMap<String, String> = self
            .providers
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.provider_type.clone()))
            .collect();

        for name in self.store.list()? {
            if summaries.contains_key(&name) {
                continue;
            }
            match self.store.load(&name) {
                Ok(record) => {
                    summaries.insert(name, record.provider_type);
                }
                Err(e) => warn!(name = %name, error = %e, "Unreadable provider record"),
            }
        }

        Ok(summaries
            .into_iter()
            .map(|(name, provider_type)| ProviderSummary {
                name,
                provider_type,
            })
            .collect())
    }

    /// Type and current configuration of a provider.
    pub async fn describe(&self, name: &str) -> Result<(String, Metadata), StateError> {
        let (provider_type, provider) = self.get(name).await?;
        let metadata = provider.lock().await.metadata();
        Ok((provider_type, metadata))
    }

    /// Install tokens obtained elsewhere (typically by a CLI `login`).
    pub async fn set_tokens(
        &self,
        name: &str,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
        expires_in: i64,
    ) -> Result<(), StateError> {
        let (_, provider) = self.get(name).await?;
        let mut provider = provider.lock().await;
        let cache = provider
            .as_token_cache()
            .ok_or_else(|| StateError::Unsupported {
                name: name.to_string(),
                capability: "token caching",
            })?;

        cache.set_tokens(
            access_token.expose_secret(),
            refresh_token.map(|t| t.expose_secret()),
            expires_in,
        )?;

        info!(name = %name, expires_in = expires_in, "Updated provider tokens");
        Ok(())
    }

    async fn build_from_disk(&self, name: &str) -> Result<Entry, StateError> {
        let record = match self.store.load(name) {
            Ok(record) => record,
            Err(StorageError::NotFound(_)) | Err(StorageError::InvalidName(_)) => {
                return Err(StateError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut provider = self
            .registry
            .create(&record.provider_type)
            .map_err(StateError::Create)?;
        provider.init(&record.data).await.map_err(StateError::Init)?;

        Ok(Entry {
            provider_type: record.provider_type,
            provider: Arc::new(Mutex::new(provider)),
        })
    }
}
