//! Tag storage and tag name normalization.

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use super::Database;

/// A tag that can be attached to any number of images
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// Trim, drop blanks, and deduplicate case-insensitively.
/// The first spelling of each tag wins; input order is kept.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| tag.as_ref().trim())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Split a comma-separated tag field as sent by upload forms.
pub fn split_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn find_tag_by_name(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let tag = conn
        .query_row(
            "SELECT id, name FROM tags WHERE name = ? COLLATE NOCASE",
            [name.trim()],
            |row| Ok(Tag { id: row.get(0)?, name: row.get(1)? }),
        )
        .optional()?;
    Ok(tag)
}

pub(crate) fn insert_tag(conn: &Connection, name: &str) -> Result<Tag> {
    let tag = Tag {
        id: Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
    };
    conn.execute(
        "INSERT INTO tags (id, name) VALUES (?, ?)",
        rusqlite::params![tag.id, tag.name],
    )?;
    Ok(tag)
}

pub(crate) fn find_or_create_tag(conn: &Connection, name: &str) -> Result<Tag> {
    match find_tag_by_name(conn, name)? {
        Some(tag) => Ok(tag),
        None => insert_tag(conn, name),
    }
}

pub(crate) fn tags_for_image(conn: &Connection, image_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT t.name
        FROM tags t
        JOIN image_tags it ON it.tag_id = t.id
        WHERE it.image_id = ?
        ORDER BY t.name COLLATE NOCASE ASC
        "#,
    )?;
    let names = stmt
        .query_map([image_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Replace the tag set of an image. Tags are expected to be normalized already.
pub(crate) fn set_image_tags(conn: &Connection, image_id: &str, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM image_tags WHERE image_id = ?", [image_id])?;
    for name in tags {
        let tag = find_or_create_tag(conn, name)?;
        conn.execute(
            "INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?, ?)",
            rusqlite::params![image_id, tag.id],
        )?;
    }
    Ok(())
}

impl Database {
    pub fn get_all_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY name COLLATE NOCASE ASC")?;
        let tags = stmt
            .query_map([], |row| Ok(Tag { id: row.get(0)?, name: row.get(1)? }))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.conn()?;
        find_tag_by_name(&conn, name)
    }

    pub fn create_tag(&self, name: &str) -> Result<Tag> {
        let conn = self.conn()?;
        insert_tag(&conn, name)
    }

    pub fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        let conn = self.conn()?;
        find_or_create_tag(&conn, name)
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

    #[test]
    fn test_normalize_tags_keeps_first_spelling() {
        let tags = normalize_tags(&["  Cat ", "dog", "CAT", "", "   ", "Dog", "bird"]);
        assert_eq!(tags, vec!["Cat", "dog", "bird"]);
    }

    #[test]
    fn test_split_tag_list() {
        assert_eq!(split_tag_list("a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_tag_list(" , ").is_empty());
    }

    #[test]
    fn test_get_or_create_is_case_insensitive() {
        let db = test_db();
        let first = db.get_or_create_tag("Receipts").unwrap();
        let second = db.get_or_create_tag("receipts ").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Receipts");
        assert_eq!(db.get_all_tags().unwrap().len(), 1);
    }

    #[test]
    fn test_tags_sorted_by_name() {
        let db = test_db();
        db.create_tag("zebra").unwrap();
        db.create_tag("Apple").unwrap();
        db.create_tag("mango").unwrap();

        let names: Vec<String> = db.get_all_tags().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Apple", "mango", "zebra"]);
    }
}
