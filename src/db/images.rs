//! Image records and their CRUD operations.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::embeddings::{parse_vector, vector_to_json};
use super::tags::{normalize_tags, set_image_tags, tags_for_image};
use super::Database;

/// An image record as returned by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub url: String,
    pub tags: Vec<String>,
    pub ocr_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// Image snapshot without the embedding, used in similarity results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    pub id: String,
    pub url: String,
    pub tags: Vec<String>,
    pub ocr_text: String,
    pub created_at: DateTime<Utc>,
}

impl Image {
    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            id: self.id.clone(),
            url: self.url.clone(),
            tags: self.tags.clone(),
            ocr_text: self.ocr_text.clone(),
            created_at: self.created_at,
        }
    }

    /// Whether the image has an embedding usable for vector similarity.
    pub fn has_vector(&self) -> bool {
        self.vector.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// Data needed to create an image record.
#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub url: String,
    pub tags: Vec<String>,
    pub ocr_text: String,
}

/// Fields of an image that can change after creation.
#[derive(Debug, Clone, Default)]
pub struct ImageUpdate {
    pub tags: Option<Vec<String>>,
    pub ocr_text: Option<String>,
}

impl ImageUpdate {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.ocr_text.is_none()
    }
}

const IMAGE_COLUMNS: &str = "i.id, i.url, i.ocr_text, i.created_at, i.vector";

struct ImageRow {
    id: String,
    url: String,
    ocr_text: Option<String>,
    created_at: String,
    vector: Option<String>,
}

impl ImageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            ocr_text: row.get(2)?,
            created_at: row.get(3)?,
            vector: row.get(4)?,
        })
    }

    fn into_image(self, conn: &Connection) -> Result<Image> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                tracing::warn!(image_id = %self.id, error = %e, "Unparsable created_at, using epoch");
                DateTime::<Utc>::UNIX_EPOCH
            });
        let vector = self
            .vector
            .as_deref()
            .and_then(|raw| parse_vector(&self.id, raw));
        let tags = tags_for_image(conn, &self.id)?;

        Ok(Image {
            id: self.id,
            url: self.url,
            tags,
            ocr_text: self.ocr_text.unwrap_or_default(),
            created_at,
            vector,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn query_images<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Image>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, ImageRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(|row| row.into_image(conn)).collect()
}

fn find_image(conn: &Connection, id: &str) -> Result<Option<Image>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM images i WHERE i.id = ?", IMAGE_COLUMNS),
            [id],
            ImageRow::from_row,
        )
        .optional()?;
    row.map(|row| row.into_image(conn)).transpose()
}

/// Escape `LIKE` wildcards so user input matches literally (used with `ESCAPE '\'`).
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Database {
    /// Insert an image and its tag associations in one transaction.
    pub fn create_image(&self, new: NewImage) -> Result<Image> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO images (id, url, ocr_text, created_at) VALUES (?, ?, ?, ?)",
            rusqlite::params![id, new.url, new.ocr_text, format_timestamp(&created_at)],
        )?;
        set_image_tags(&tx, &id, &normalize_tags(&new.tags))?;
        let tags = tags_for_image(&tx, &id)?;
        tx.commit()?;

        Ok(Image {
            id,
            url: new.url,
            tags,
            ocr_text: new.ocr_text,
            created_at,
            vector: None,
        })
    }

    pub fn get_image(&self, id: &str) -> Result<Option<Image>> {
        let conn = self.conn()?;
        find_image(&conn, id)
    }

    /// All images, newest first.
    pub fn get_all_images(&self) -> Result<Vec<Image>> {
        let conn = self.conn()?;
        query_images(
            &conn,
            &format!("SELECT {} FROM images i ORDER BY i.created_at DESC, i.rowid DESC", IMAGE_COLUMNS),
            rusqlite::params![],
        )
    }

    /// Images carrying `tag`, compared case-insensitively.
    pub fn find_images_by_tag(&self, tag: &str) -> Result<Vec<Image>> {
        let conn = self.conn()?;
        query_images(
            &conn,
            &format!(
                r#"
                SELECT {}
                FROM images i
                JOIN image_tags it ON it.image_id = i.id
                JOIN tags t ON t.id = it.tag_id
                WHERE t.name = ? COLLATE NOCASE
                ORDER BY i.created_at DESC, i.rowid DESC
                "#,
                IMAGE_COLUMNS
            ),
            [tag.trim()],
        )
    }

    /// Images whose OCR text or any tag name contains `query`.
    pub fn search_images(&self, query: &str) -> Result<Vec<Image>> {
        let conn = self.conn()?;
        let pattern = format!("%{}%", escape_like(query.trim()));
        query_images(
            &conn,
            &format!(
                r#"
                SELECT {}
                FROM images i
                WHERE i.ocr_text LIKE ?1 ESCAPE '\'
                   OR EXISTS (
                       SELECT 1
                       FROM image_tags it
                       JOIN tags t ON t.id = it.tag_id
                       WHERE it.image_id = i.id AND t.name LIKE ?1 ESCAPE '\'
                   )
                ORDER BY i.created_at DESC, i.rowid DESC
                "#,
                IMAGE_COLUMNS
            ),
            [pattern],
        )
    }

    /// Apply an update. Returns `None` when the image does not exist.
    pub fn update_image(&self, id: &str, update: ImageUpdate) -> Result<Option<Image>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM images WHERE id = ?)",
            [id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }

        if let Some(ocr_text) = &update.ocr_text {
            tx.execute(
                "UPDATE images SET ocr_text = ? WHERE id = ?",
                rusqlite::params![ocr_text, id],
            )?;
        }
        if let Some(tags) = &update.tags {
            set_image_tags(&tx, id, &normalize_tags(tags))?;
        }

        let image = find_image(&tx, id)?;
        tx.commit()?;
        Ok(image)
    }

    /// Delete the record and its tag associations. Returns the URL of the
    /// deleted image so the caller can remove the file.
    pub fn delete_image(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let url: Option<String> = conn
            .query_row("SELECT url FROM images WHERE id = ?", [id], |row| row.get(0))
            .optional()?;

        let Some(url) = url else {
            return Ok(None);
        };

        let deleted = conn.execute("DELETE FROM images WHERE id = ?", [id])?;
        Ok((deleted > 0).then_some(url))
    }

    pub fn count_images(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn set_image_vector(&self, id: &str, vector: Option<&[f32]>) -> Result<bool> {
        let conn = self.conn()?;
        let encoded = vector.map(vector_to_json).transpose()?;
        let updated = conn.execute(
            "UPDATE images SET vector = ? WHERE id = ?",
            rusqlite::params![encoded, id],
        )?;
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn new_image(url: &str, tags: &[&str], ocr: &str) -> NewImage {
        NewImage {
            url: url.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ocr_text: ocr.to_string(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let db = test_db();
        let image = db
            .create_image(new_image("/uploads/a.png", &["Zeta", "alpha", "ALPHA"], "hello"))
            .unwrap();

        assert_eq!(image.tags, vec!["alpha", "Zeta"]);
        assert!(image.vector.is_none());

        let loaded = db.get_image(&image.id).unwrap().unwrap();
        assert_eq!(loaded.tags, image.tags);
        assert_eq!(loaded.ocr_text, "hello");
        assert_eq!(loaded.created_at.timestamp_millis(), image.created_at.timestamp_millis());
        assert_eq!(db.get_all_tags().unwrap().len(), 2);
    }

    #[test]
    fn test_listing_is_newest_first() {
        let db = test_db();
        let first = db.create_image(new_image("/uploads/1.png", &[], "")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = db.create_image(new_image("/uploads/2.png", &[], "")).unwrap();

        let ids: Vec<String> = db.get_all_images().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_update_replaces_tags_and_text() {
        let db = test_db();
        let image = db.create_image(new_image("/uploads/a.png", &["old"], "before")).unwrap();

        let updated = db
            .update_image(
                &image.id,
                ImageUpdate {
                    tags: Some(vec!["New".to_string(), "new".to_string()]),
                    ocr_text: Some("after".to_string()),
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.tags, vec!["New"]);
        assert_eq!(updated.ocr_text, "after");

        // Orphaned tags stay in the tag store
        assert_eq!(db.get_all_tags().unwrap().len(), 2);
        assert!(db.update_image("missing", ImageUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn test_search_and_find_by_tag() {
        let db = test_db();
        let receipt = db.create_image(new_image("/uploads/r.png", &["Receipt"], "TOTAL 12.00")).unwrap();
        db.create_image(new_image("/uploads/c.png", &["cat"], "")).unwrap();

        let by_tag = db.find_images_by_tag("receipt").unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, receipt.id);

        let by_text = db.search_images("total").unwrap();
        assert_eq!(by_text.len(), 1);

        let by_tag_name = db.search_images("ca").unwrap();
        assert_eq!(by_tag_name.len(), 1);
        assert_eq!(by_tag_name[0].tags, vec!["cat"]);
    }

    #[test]
    fn test_search_wildcards_match_literally() {
        let db = test_db();
        let discount = db.create_image(new_image("/uploads/d.png", &["sale"], "50% off")).unwrap();
        db.create_image(new_image("/uploads/e.png", &["plain"], "nothing here")).unwrap();
        db.create_image(new_image("/uploads/f.png", &["file_name"], "")).unwrap();

        let percent = db.search_images("%").unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].id, discount.id);

        let underscore = db.search_images("_").unwrap();
        assert_eq!(underscore.len(), 1);
        assert_eq!(underscore[0].tags, vec!["file_name"]);

        assert!(db.search_images("\\").unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_associations() {
        let db = test_db();
        let image = db.create_image(new_image("/uploads/a.png", &["x"], "")).unwrap();

        assert_eq!(db.delete_image(&image.id).unwrap().as_deref(), Some("/uploads/a.png"));
        assert!(db.get_image(&image.id).unwrap().is_none());
        assert!(db.delete_image(&image.id).unwrap().is_none());

        let conn = db.conn().unwrap();
        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM image_tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(links, 0);
    }

    #[test]
    fn test_vector_roundtrip_and_corrupt_row() {
        let db = test_db();
        let good = db.create_image(new_image("/uploads/a.png", &[], "")).unwrap();
        let bad = db.create_image(new_image("/uploads/b.png", &[], "")).unwrap();

        assert!(db.set_image_vector(&good.id, Some(&[0.5, -1.0, 2.0][..])).unwrap());
        db.conn()
            .unwrap()
            .execute("UPDATE images SET vector = 'not json' WHERE id = ?", [&bad.id])
            .unwrap();

        // One corrupt row must not break the listing
        let images = db.get_all_images().unwrap();
        assert_eq!(images.len(), 2);

        let good = db.get_image(&good.id).unwrap().unwrap();
        assert_eq!(good.vector, Some(vec![0.5, -1.0, 2.0]));
        assert!(good.has_vector());

        let bad = db.get_image(&bad.id).unwrap().unwrap();
        assert!(bad.vector.is_none());
    }
}
