use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::errors::ApiError;
use super::AppState;
use crate::db::Tag;

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    #[serde(default)]
    name: Value,
}

pub async fn create_tag(
    State(state): State<AppState>,
    Json(request): Json<CreateTagRequest>,
) -> Result<(StatusCode, Json<Tag>), ApiError> {
    let name = request
        .name
        .as_str()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("Tag name is required"))?
        .to_string();

    let tag = state
        .with_db("Error creating tag", move |db| {
            if db.find_tag_by_name(&name)?.is_some() {
                return Ok(None);
            }
            db.create_tag(&name).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::bad_request("Tag already exists"))?;

    Ok((StatusCode::CREATED, Json(tag)))
}

pub async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, ApiError> {
    let tags = state
        .with_db("Error retrieving tags", |db| db.get_all_tags())
        .await?;
    Ok(Json(tags))
}
