//! Provider Client Factory — returns pooled, per-`(provider, api_key)`
//! streaming clients.
//!
//! Grounded on the read-mostly cache shape of the teacher's
//! `user_facts_cache` (`crates/gateway/src/state.rs`): a `HashMap` behind a
//! `parking_lot::RwLock`, generalized here with a bounded insertion-order
//! eviction so the cache never grows past `capacity`.

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use ic_domain::config::ProviderConfig;
use ic_domain::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider_id: String,
    api_key_fingerprint: String,
}

/// Memoizes [`LlmProvider`] clients by `(provider, api_key)`.
///
/// All four known provider kinds (`openai`, `together`, `hyperbolic`, the
/// Project David control plane) are thin OpenAI-compatible clients, so the
/// factory only ever constructs [`OpenAiCompatProvider`]s — per distilled
/// §4.2, "providers are polymorphic over this capability set".
pub struct ProviderFactory {
    capacity: usize,
    clients: RwLock<HashMap<CacheKey, Arc<dyn LlmProvider>>>,
    order: RwLock<Vec<CacheKey>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            clients: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Return the cached client for `cfg`, constructing and memoizing one
    /// on first use. The cache key folds in the resolved API key fingerprint
    /// (the first 8 chars, never the full secret) so two providers with the
    /// same id but rotated credentials don't collide.
    pub fn get(&self, cfg: &ProviderConfig, api_key_fingerprint: &str) -> Result<Arc<dyn LlmProvider>> {
        let key = CacheKey {
            provider_id: cfg.id.clone(),
            api_key_fingerprint: api_key_fingerprint.to_string(),
        };

        if let Some(client) = self.clients.read().get(&key) {
            return Ok(Arc::clone(client));
        }

        let client: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::from_config(cfg)?);

        let mut clients = self.clients.write();
        let mut order = self.order.write();
        if !clients.contains_key(&key) {
            if clients.len() >= self.capacity {
                if let Some(oldest) = pop_front(&mut order) {
                    clients.remove(&oldest);
                }
            }
            order.push(key.clone());
            clients.insert(key.clone(), Arc::clone(&client));
        }
        clients
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Other("provider factory cache corrupted".into()))
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn pop_front(order: &mut Vec<CacheKey>) -> Option<CacheKey> {
    if order.is_empty() {
        None
    } else {
        Some(order.remove(0))
    }
}

/// Strip the namespace prefix from a model identifier before the upstream
/// call (distilled §6's model identifier convention), e.g.
/// `together-ai/Qwen/Qwen3-Coder` -> `Qwen/Qwen3-Coder`.
pub fn strip_model_prefix(kind: ic_domain::config::ProviderKind, model: &str) -> String {
    model
        .strip_prefix(kind.model_prefix())
        .unwrap_or(model)
        .to_string()
}
