use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;

use super::errors::{ApiError, ResultExt};
use super::images::{multipart_error, read_file_field, read_text_field, UploadedFile};
use super::AppState;
use crate::llm::LlmClient;
use crate::ocr::is_valid_language;

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmOcrResponse {
    pub text: String,
    pub suggested_tags: Vec<String>,
    pub method: &'static str,
    pub model: String,
}

/// Read the `image` part plus an optional `language` field.
async fn read_ocr_form(mut multipart: Multipart) -> Result<(UploadedFile, Option<String>), ApiError> {
    let mut file = None;
    let mut language = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => file = Some(read_file_field(field).await?),
            Some("language") => language = Some(read_text_field(field).await?),
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    if file.bytes.is_empty() {
        return Err(ApiError::bad_request("Uploaded file data is unavailable for OCR"));
    }
    Ok((file, language))
}

pub async fn extract_text(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<OcrResponse>, ApiError> {
    let (file, language) = read_ocr_form(multipart).await?;
    let language = state.ocr.language_for(language.as_deref());

    if !is_valid_language(&language) {
        return Err(ApiError::bad_request(format!("Unsupported OCR language: {}", language)));
    }

    let text = state
        .ocr
        .recognize(&file.bytes, &language)
        .await
        .or_internal("Error extracting text")?;

    Ok(Json(OcrResponse { text, language }))
}

pub async fn extract_text_llm(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<LlmOcrResponse>, ApiError> {
    let (file, _) = read_ocr_form(multipart).await?;
    let client = LlmClient::from_config(&state.llm_config()?)?;

    let model = client.model().to_string();
    let result = tokio::task::spawn_blocking(move || {
        client.extract_text(&file.bytes, file.content_type.as_deref())
    })
    .await
    .or_internal("Error extracting text with LLM")??;

    Ok(Json(LlmOcrResponse {
        text: result.text,
        suggested_tags: result.suggested_tags,
        method: "llm",
        model,
    }))
}
