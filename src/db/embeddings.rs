//! Embedding vector storage.
//!
//! Vectors live in the nullable `images.vector` column as a JSON array of
//! floats. A row whose vector fails to parse is treated as having no vector.

use anyhow::Result;

use super::Database;

/// An image that still needs an embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVector {
    pub image_id: String,
    pub url: String,
}

/// Encode a vector for storage
pub fn vector_to_json(vector: &[f32]) -> Result<String> {
    Ok(serde_json::to_string(vector)?)
}

/// Decode a stored vector, logging and discarding malformed values.
pub fn parse_vector(image_id: &str, raw: &str) -> Option<Vec<f32>> {
    match serde_json::from_str::<Vec<f32>>(raw) {
        Ok(vector) => Some(vector),
        Err(e) => {
            tracing::warn!(image_id, error = %e, "Ignoring malformed stored vector");
            None
        }
    }
}

impl Database {
    /// Every image with its URL and whether it holds a usable vector.
    fn vector_presence(&self) -> Result<Vec<(PendingVector, bool)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, url, vector
            FROM images
            ORDER BY created_at ASC, rowid ASC
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(image_id, url, vector)| {
                let usable = vector
                    .as_deref()
                    .and_then(|raw| parse_vector(&image_id, raw))
                    .is_some_and(|v| !v.is_empty());
                (PendingVector { image_id, url }, usable)
            })
            .collect())
    }

    /// Images with no usable vector: NULL, empty, or unparsable.
    pub fn get_images_without_vector(&self) -> Result<Vec<PendingVector>> {
        Ok(self
            .vector_presence()?
            .into_iter()
            .filter(|(_, usable)| !usable)
            .map(|(pending, _)| pending)
            .collect())
    }

    /// Count images with a usable stored vector. Agrees with
    /// [`Database::get_images_without_vector`].
    pub fn count_vectors(&self) -> Result<i64> {
        let usable = self
            .vector_presence()?
            .into_iter()
            .filter(|(_, usable)| *usable)
            .count();
        Ok(usable as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewImage;

    #[test]
    fn test_vector_json_conversion() {
        let original = vec![1.5, -2.25, 0.0, 100.0];
        let json = vector_to_json(&original).unwrap();
        assert_eq!(parse_vector("x", &json), Some(original));
        assert_eq!(parse_vector("x", "{\"oops\":1}"), None);
    }

    #[test]
    fn test_images_without_vector() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let with = db
            .create_image(NewImage { url: "/uploads/a.png".into(), ..Default::default() })
            .unwrap();
        let without = db
            .create_image(NewImage { url: "/uploads/b.png".into(), ..Default::default() })
            .unwrap();
        let empty = db
            .create_image(NewImage { url: "/uploads/c.png".into(), ..Default::default() })
            .unwrap();

        db.set_image_vector(&with.id, Some(&[1.0, 2.0][..])).unwrap();
        db.set_image_vector(&empty.id, Some(&[] as &[f32])).unwrap();

        let pending: Vec<String> = db
            .get_images_without_vector()
            .unwrap()
            .into_iter()
            .map(|p| p.image_id)
            .collect();

        assert_eq!(pending, vec![without.id, empty.id]);
        assert_eq!(db.count_vectors().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_vector_is_not_counted() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let good = db
            .create_image(NewImage { url: "/uploads/a.png".into(), ..Default::default() })
            .unwrap();
        let corrupt = db
            .create_image(NewImage { url: "/uploads/b.png".into(), ..Default::default() })
            .unwrap();

        db.set_image_vector(&good.id, Some(&[0.5, 0.5][..])).unwrap();
        db.conn()
            .unwrap()
            .execute("UPDATE images SET vector = 'not json' WHERE id = ?", [&corrupt.id])
            .unwrap();

        let pending = db.get_images_without_vector().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].image_id, corrupt.id);
        assert_eq!(db.count_vectors().unwrap(), 1);
        assert_eq!(db.count_images().unwrap() - db.count_vectors().unwrap(), pending.len() as i64);
    }
}
