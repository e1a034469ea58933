use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::errors::{ApiError, ResultExt};
use super::AppState;
use crate::config::{Config, LlmConfig, LlmConfigUpdate};

/// LLM settings as shown to clients. The key itself is never returned.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfigView {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub has_api_key: bool,
}

impl From<&LlmConfig> for LlmConfigView {
    fn from(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            has_api_key: config.has_api_key(),
        }
    }
}

pub async fn get_llm_config(State(state): State<AppState>) -> Result<Json<LlmConfigView>, ApiError> {
    Ok(Json(LlmConfigView::from(&state.llm_config()?)))
}

pub async fn update_llm_config(
    State(state): State<AppState>,
    Json(update): Json<LlmConfigUpdate>,
) -> Result<Json<LlmConfigView>, ApiError> {
    let (updated, changed) = {
        let mut config = state
            .llm
            .write()
            .map_err(|_| ApiError::internal("Error updating LLM configuration", "settings lock poisoned"))?;
        let changed = config.apply(update.clone());
        (config.clone(), changed)
    };

    if changed {
        if let Some(path) = state.config_path.clone() {
            tokio::task::spawn_blocking(move || Config::persist_llm(&path, &update))
                .await
                .or_internal("Error updating LLM configuration")?
                .or_internal("Error updating LLM configuration")?;
        }
        tracing::info!(base_url = %updated.base_url, model = %updated.model, "LLM configuration updated");
    }

    Ok(Json(LlmConfigView::from(&updated)))
}
