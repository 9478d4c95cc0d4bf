use std::collections::HashSet;
use std::sync::Arc;

use specter_core::{ProcessingStatus, Stage, StatusCallback};
use specter_ollama::OllamaClient;
use tokio::sync::RwLock;

/// Tracks which model names have been confirmed available on the server,
/// pulling them on first use when missing.
pub struct ModelCatalog {
    client: Arc<OllamaClient>,
    confirmed: RwLock<HashSet<String>>,
}

impl ModelCatalog {
    pub fn new(client: Arc<OllamaClient>) -> Self {
        Self {
            client,
            confirmed: RwLock::new(HashSet::new()),
        }
    }

    /// True iff the server answers the model-listing call.
    pub async fn check_connection(&self) -> bool {
        self.client.list_models().await.is_ok()
    }

    /// Confirm `name` is available, listing first and pulling if absent.
    ///
    /// A listed model counts when its name contains `name` as a substring
    /// ("llama3.2" matches "llama3.2:latest"). Failures are swallowed into
    /// `false`: the caller attempts generation anyway and surfaces the more
    /// specific error from that call.
    pub async fn ensure_model_exists(&self, name: &str, status: Option<&StatusCallback>) -> bool {
        if self.confirmed.read().await.contains(name) {
            return true;
        }

        let models = match self.client.list_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(model = %name, error = %e, "model listing failed");
                return false;
            }
        };

        if !models.iter().any(|m| m.name.contains(name)) {
            if let Some(status) = status {
                status(&ProcessingStatus::new(
                    Stage::Initializing,
                    format!("Downloading {name} model..."),
                    None,
                ));
            }
            if let Err(e) = self.client.pull_model(name).await {
                tracing::warn!(model = %name, error = %e, "model pull failed");
                return false;
            }
        }

        self.confirmed.write().await.insert(name.to_string());
        true
    }
}
