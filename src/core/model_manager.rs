//! Backend model selection
//!
//! Clients ask for a logical model family name; the gateway serves it with one
//! of two configured backend models.

use tracing::warn;

/// Maps logical model names onto the configured backend models
#[derive(Debug, Clone)]
pub struct ModelManager {
    big_model: String,
    small_model: String,
}

impl ModelManager {
    /// Create a new ModelManager from the configured backend model names
    pub fn new(big_model: impl Into<String>, small_model: impl Into<String>) -> Self {
        Self {
            big_model: big_model.into(),
            small_model: small_model.into(),
        }
    }

    /// Pick the backend model serving `model`
    ///
    /// Matching is a case-insensitive substring test: opus and sonnet go to
    /// the big model, haiku to the small one. Anything else falls back to the
    /// small model with a warning.
    pub fn select_model(&self, model: &str) -> String {
        let model_lower = model.to_lowercase();
        if model_lower.contains("opus") || model_lower.contains("sonnet") {
            self.big_model.clone()
        } else if model_lower.contains("haiku") {
            self.small_model.clone()
        } else {
            warn!(
                requested = %model,
                fallback = %self.small_model,
                "Unrecognized model, defaulting to small model"
            );
            self.small_model.clone()
        }
    }
}
