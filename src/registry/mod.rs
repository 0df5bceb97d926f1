//! Adapter registry
//!
//! Builds adapters from provider configs and memoizes them in an LRU cache
//! keyed by provider id. Each entry remembers the config snapshot it was
//! built from; a lookup with a different snapshot rebuilds rather than
//! patching the old adapter. Decrypted credentials exist only inside the
//! adapters held here.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;

use crate::adapters::AdapterKind;
use crate::credentials::CredentialCipher;
use crate::error::LlmError;
use crate::settings::HttpSettings;
use crate::store::ConfigStore;
use crate::types::ProviderConfig;

struct CacheEntry {
    snapshot: ProviderConfig,
    adapter: Arc<AdapterKind>,
}

/// Keyed adapter cache owned by one dispatcher
pub struct AdapterRegistry {
    store: Arc<dyn ConfigStore>,
    cipher: Arc<dyn CredentialCipher>,
    client: reqwest::Client,
    default_timeout: Duration,
    cache: Arc<TokioMutex<LruCache<String, CacheEntry>>>,
}

impl AdapterRegistry {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cipher: Arc<dyn CredentialCipher>,
        http: &HttpSettings,
        capacity: NonZeroUsize,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            store,
            cipher,
            client: http.build_client()?,
            default_timeout: http.default_timeout(),
            cache: Arc::new(TokioMutex::new(LruCache::new(capacity))),
        })
    }

    /// Adapter for the current stored config of `provider_id`.
    pub async fn get(&self, provider_id: &str) -> Result<Arc<AdapterKind>, LlmError> {
        let config = self
            .store
            .get_provider_config(provider_id)
            .await?
            .ok_or_else(|| {
                LlmError::configuration(format!("provider '{provider_id}' not found"))
            })?;
        self.get_for(&config).await
    }

    /// Adapter for a specific config snapshot.
    pub async fn get_for(&self, config: &ProviderConfig) -> Result<Arc<AdapterKind>, LlmError> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(&config.id) {
            if entry.snapshot == *config {
                return Ok(entry.adapter.clone());
            }
            debug!(provider_id = %config.id, "provider config changed, rebuilding adapter");
            cache.pop(&config.id);
        }
        drop(cache);

        let adapter = Arc::new(self.build(config)?);

        let mut cache = self.cache.lock().await;
        cache.put(
            config.id.clone(),
            CacheEntry {
                snapshot: config.clone(),
                adapter: adapter.clone(),
            },
        );
        Ok(adapter)
    }

    /// Per-attempt deadline used when a call sets no timeout.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn invalidate(&self, provider_id: &str) {
        if self.cache.lock().await.pop(provider_id).is_some() {
            debug!(provider_id = %provider_id, "adapter invalidated");
        }
    }

    pub async fn invalidate_all(&self) {
        self.cache.lock().await.clear();
        debug!("adapter cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn build(&self, config: &ProviderConfig) -> Result<AdapterKind, LlmError> {
        let api_key = config
            .credential
            .as_deref()
            .map(|opaque| self.cipher.decrypt(opaque))
            .transpose()?;
        debug!(provider_id = %config.id, kind = %config.kind, "building adapter");
        AdapterKind::build(config, api_key, self.client.clone(), self.default_timeout)
    }
}
