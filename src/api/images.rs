//! Image CRUD and upload handlers.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::errors::ApiError;
use super::AppState;
use crate::db::{split_tag_list, Database, Image, ImageUpdate, NewImage, PendingVector};
use crate::storage::{sanitize_filename, UploadStore};

/// Files accepted by one batch upload
pub const MAX_BATCH_FILES: usize = 20;

/// A file part read from a multipart form
pub(crate) struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub(crate) async fn read_file_field(
    field: axum::extract::multipart::Field<'_>,
) -> Result<UploadedFile, ApiError> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    let content_type = field.content_type().map(str::to_string);
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?;
    Ok(UploadedFile {
        file_name,
        content_type,
        bytes: bytes.to_vec(),
    })
}

pub(crate) async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid form field: {}", e)))
}

pub(crate) fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("Invalid multipart body: {}", e))
}

/// Tags as sent by clients: a comma-separated string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Text(String),
}

impl TagsInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            TagsInput::List(tags) => tags,
            TagsInput::Text(raw) => split_tag_list(&raw),
        }
    }
}

/// Per-file metadata of a batch upload, keyed by sanitized original filename.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default)]
    pub tags: Option<TagsInput>,
    #[serde(default)]
    pub ocr_text: Option<String>,
}

/// Save files and create their records as one unit: if any file fails, the
/// records and files already written for the batch are removed again.
pub(crate) fn persist_uploads(
    db: &Database,
    store: &UploadStore,
    uploads: Vec<(UploadedFile, NewImage)>,
) -> anyhow::Result<Vec<Image>> {
    let mut created: Vec<Image> = Vec::with_capacity(uploads.len());

    for (file, mut new) in uploads {
        let result = store.save(&file.bytes, &file.file_name).and_then(|stored| {
            new.url = stored.url.clone();
            db.create_image(new).inspect_err(|_| {
                store.delete(&stored.url);
            })
        });

        match result {
            Ok(image) => created.push(image),
            Err(e) => {
                for image in created.iter().rev() {
                    if let Err(cleanup) = db.delete_image(&image.id) {
                        tracing::error!(image_id = %image.id, error = %cleanup, "Failed to roll back uploaded image");
                    }
                    store.delete(&image.url);
                }
                tracing::warn!(file = %file.file_name, rolled_back = created.len(), error = %e, "Upload failed");
                return Err(e);
            }
        }
    }

    Ok(created)
}

async fn store_images(state: &AppState, uploads: Vec<(UploadedFile, NewImage)>) -> Result<Vec<Image>, ApiError> {
    let store = std::sync::Arc::clone(&state.uploads);
    let created = state
        .with_db("Error uploading image", move |db| persist_uploads(db, &store, uploads))
        .await?;

    for image in &created {
        tracing::info!(image_id = %image.id, url = %image.url, "Image uploaded");
        enqueue_vector(state, image);
    }

    Ok(created)
}

fn enqueue_vector(state: &AppState, image: &Image) {
    state.vectors.enqueue(PendingVector {
        image_id: image.id.clone(),
        url: image.url.clone(),
    });
}

pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Image>), ApiError> {
    let mut file = None;
    let mut tags = Vec::new();
    let mut ocr_text = String::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => file = Some(read_file_field(field).await?),
            Some("tags") => tags = split_tag_list(&read_text_field(field).await?),
            Some("ocrText") => ocr_text = read_text_field(field).await?.trim().to_string(),
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    let new = NewImage {
        url: String::new(),
        tags,
        ocr_text,
    };

    let mut created = store_images(&state, vec![(file, new)]).await?;
    let image = created
        .pop()
        .ok_or_else(|| ApiError::internal("Error uploading image", "no image created"))?;

    Ok((StatusCode::CREATED, Json(image)))
}

pub async fn upload_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<Image>>), ApiError> {
    let mut files = Vec::new();
    let mut metadata_raw = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("images") => {
                if files.len() == MAX_BATCH_FILES {
                    return Err(ApiError::bad_request(format!(
                        "Too many files, at most {} per batch",
                        MAX_BATCH_FILES
                    )));
                }
                files.push(read_file_field(field).await?);
            }
            Some("metadata") => metadata_raw = Some(read_text_field(field).await?),
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    let mut metadata: HashMap<String, FileMetadata> = match metadata_raw.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw).map_err(|_| {
            ApiError::bad_request("Invalid metadata format. Expected a JSON string.")
        })?,
        _ => HashMap::new(),
    };

    let uploads = files
        .into_iter()
        .map(|file| {
            let meta = metadata
                .remove(&sanitize_filename(&file.file_name))
                .unwrap_or_default();
            let new = NewImage {
                url: String::new(),
                tags: meta.tags.map(TagsInput::into_vec).unwrap_or_default(),
                ocr_text: meta.ocr_text.unwrap_or_default(),
            };
            (file, new)
        })
        .collect();

    let created = store_images(&state, uploads).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_images(State(state): State<AppState>) -> Result<Json<Vec<Image>>, ApiError> {
    let images = state
        .with_db("Error fetching images", |db| db.get_all_images())
        .await?;
    Ok(Json(images))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
}

pub async fn search_images(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Image>>, ApiError> {
    let q = query
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Query parameter q is required"))?;

    let images = state
        .with_db("Error searching images", move |db| db.search_images(&q))
        .await?;
    Ok(Json(images))
}

#[derive(Debug, Deserialize)]
pub struct TagQuery {
    tag: Option<String>,
}

pub async fn images_by_tag(
    State(state): State<AppState>,
    Query(query): Query<TagQuery>,
) -> Result<Json<Vec<Image>>, ApiError> {
    let tag = query
        .tag
        .filter(|tag| !tag.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Tag query parameter is required"))?;

    let images = state
        .with_db("Error fetching images by tag", move |db| db.find_images_by_tag(&tag))
        .await?;
    Ok(Json(images))
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Image>, ApiError> {
    state
        .with_db("Error fetching image", move |db| db.get_image(&id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Image not found"))
}

/// Validate an update body. Only the presence of a key matters: `null`
/// clears the field, other types are rejected.
pub fn parse_update(body: &Value) -> Result<ImageUpdate, ApiError> {
    let Some(fields) = body.as_object() else {
        return Err(ApiError::bad_request("Request body must be a JSON object"));
    };

    let mut update = ImageUpdate::default();

    if let Some(raw) = fields.get("ocrText") {
        update.ocr_text = Some(match raw {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            _ => return Err(ApiError::bad_request("OCR text must be a string")),
        });
    }

    if let Some(raw) = fields.get("tags") {
        update.tags = Some(match raw {
            Value::String(text) => split_tag_list(text),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            Value::Null => Vec::new(),
            _ => return Err(ApiError::bad_request("Tags must be a string or array of strings")),
        });
    }

    if update.is_empty() {
        return Err(ApiError::bad_request("No valid fields provided for update"));
    }

    Ok(update)
}

pub async fn update_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Image>, ApiError> {
    let update = parse_update(&body)?;

    let image = state
        .with_db("Error updating image", move |db| db.update_image(&id, update))
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;

    enqueue_vector(&state, &image);
    Ok(Json(image))
}

pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let store = std::sync::Arc::clone(&state.uploads);
    let deleted = state
        .with_db("Error deleting image", move |db| {
            let url = db.delete_image(&id)?;
            if let Some(url) = &url {
                if !store.delete(url) {
                    tracing::warn!(image_id = %id, url = %url, "No file removed for deleted image");
                }
            }
            Ok(url.is_some())
        })
        .await?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Image not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_update_fields() {
        let update = parse_update(&json!({"ocrText": "hello", "tags": "a, b,,"})).unwrap();
        assert_eq!(update.ocr_text.as_deref(), Some("hello"));
        assert_eq!(update.tags, Some(vec!["a".to_string(), "b".to_string()]));

        let update = parse_update(&json!({"tags": [" x ", 3, "", "y"]})).unwrap();
        assert_eq!(update.tags, Some(vec!["x".to_string(), "y".to_string()]));
        assert!(update.ocr_text.is_none());
    }

    #[test]
    fn test_parse_update_nulls_clear() {
        let update = parse_update(&json!({"ocrText": null, "tags": null})).unwrap();
        assert_eq!(update.ocr_text.as_deref(), Some(""));
        assert_eq!(update.tags, Some(Vec::new()));
    }

    #[test]
    fn test_parse_update_rejects_bad_input() {
        assert!(matches!(parse_update(&json!({})), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_update(&json!({"other": 1})), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_update(&json!({"ocrText": 5})), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_update(&json!({"tags": {"a": 1}})), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_update(&json!(["tags"])), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_batch_metadata_shapes() {
        let metadata: HashMap<String, FileMetadata> = serde_json::from_str(
            r#"{"a.png": {"tags": ["x", "y"], "ocrText": "hi"}, "b.png": {"tags": "p, q"}, "c.png": {}}"#,
        )
        .unwrap();

        assert_eq!(metadata["a.png"].tags.clone().map(TagsInput::into_vec), Some(vec!["x".into(), "y".into()]));
        assert_eq!(metadata["b.png"].tags.clone().map(TagsInput::into_vec), Some(vec!["p".into(), "q".into()]));
        assert!(metadata["c.png"].ocr_text.is_none());
    }

    fn upload(name: &str) -> (UploadedFile, NewImage) {
        let file = UploadedFile {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: name.as_bytes().to_vec(),
        };
        let new = NewImage {
            tags: vec!["batch".to_string()],
            ..Default::default()
        };
        (file, new)
    }

    #[test]
    fn test_failed_batch_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"), "http://localhost:5000");
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        // Let the first insert through and reject the second
        db.conn()
            .unwrap()
            .execute_batch(
                r#"
                CREATE TRIGGER reject_second_image BEFORE INSERT ON images
                WHEN (SELECT COUNT(*) FROM images) >= 1
                BEGIN
                    SELECT RAISE(ABORT, 'disk full');
                END;
                "#,
            )
            .unwrap();

        let result = persist_uploads(&db, &store, vec![upload("one.png"), upload("two.png"), upload("three.png")]);

        assert!(result.is_err());
        assert_eq!(db.count_images().unwrap(), 0);
        assert!(db.find_images_by_tag("batch").unwrap().is_empty());
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_batch_persists_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"), "http://localhost:5000");
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let created = persist_uploads(&db, &store, vec![upload("one.png"), upload("two.png")]).unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(db.count_images().unwrap(), 2);
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 2);
    }
}
