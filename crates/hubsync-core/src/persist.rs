// ── Persisted values ──
//
// The key-value store is injected; which storage technology backs it is
// the embedding application's choice. The dispatcher restores from it on
// start and writes every confirmed value through to it.

use async_trait::async_trait;
use dashmap::DashMap;
use hubsync_api::ParamValue;
use thiserror::Error;

use crate::model::ParameterKey;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Value store unavailable: {0}")]
    Unavailable(String),

    #[error("Stored value for {key} is unreadable: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable home of last-known parameter values.
#[async_trait]
pub trait ValueStore: Send + Sync + 'static {
    async fn load(&self, key: &ParameterKey) -> Result<Option<ParamValue>, StoreError>;

    async fn save(&self, key: &ParameterKey, value: &ParamValue) -> Result<(), StoreError>;
}

/// In-process store; the default when nothing durable is configured.
#[derive(Debug, Default)]
pub struct MemoryValueStore {
    values: DashMap<ParameterKey, ParamValue>,
}

impl MemoryValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: impl IntoIterator<Item = (ParameterKey, ParamValue)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &ParameterKey) -> Option<ParamValue> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl ValueStore for MemoryValueStore {
    async fn load(&self, key: &ParameterKey) -> Result<Option<ParamValue>, StoreError> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &ParameterKey, value: &ParamValue) -> Result<(), StoreError> {
        self.values.insert(key.clone(), value.clone());
        Ok(())
    }
}
