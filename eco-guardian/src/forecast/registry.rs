//! Per-state model registry.
//!
//! Readers get an `Arc` to a fully built model or nothing; installing a new
//! model swaps the handle under the write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::StateForecastModel;
use crate::regions::Uf;

pub struct ModelRegistry {
    models: RwLock<HashMap<Uf, Arc<StateForecastModel>>>,
    next_version: AtomicU64,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
        }
    }

    pub async fn get(&self, state: Uf) -> Option<Arc<StateForecastModel>> {
        self.models.read().await.get(&state).cloned()
    }

    /// Assign the next version to `model` and make it current for its state.
    pub async fn install(&self, mut model: StateForecastModel) -> Arc<StateForecastModel> {
        model.version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let model = Arc::new(model);
        let previous = self
            .models
            .write()
            .await
            .insert(model.state, Arc::clone(&model));
        info!(
            state = %model.state,
            version = model.version,
            replaced = ?previous.map(|p| p.version),
            "Installed state model"
        );
        model
    }

    /// Load a persisted model, keeping its version.
    ///
    /// Ignored when a newer model is already registered.
    pub async fn restore(&self, model: StateForecastModel) -> bool {
        self.next_version
            .fetch_max(model.version + 1, Ordering::SeqCst);
        let mut models = self.models.write().await;
        match models.get(&model.state) {
            Some(current) if current.version >= model.version => false,
            _ => {
                models.insert(model.state, Arc::new(model));
                true
            }
        }
    }

    /// Current models ordered by state.
    pub async fn snapshot(&self) -> Vec<Arc<StateForecastModel>> {
        let mut models: Vec<Arc<StateForecastModel>> =
            self.models.read().await.values().cloned().collect();
        models.sort_by_key(|m| m.state);
        models
    }

    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }
}
