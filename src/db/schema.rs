pub const SCHEMA: &str = r#"
-- Images: one row per uploaded file
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    ocr_text TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL  -- RFC 3339, UTC, millisecond precision
);

CREATE INDEX IF NOT EXISTS idx_images_created_at ON images(created_at);

-- Tags: names are unique; lookups compare case-insensitively
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name COLLATE NOCASE);

-- Image to tag mapping
CREATE TABLE IF NOT EXISTS image_tags (
    image_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    PRIMARY KEY (image_id, tag_id),
    FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_image_tags_image ON image_tags(image_id);
CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag_id);
"#;

/// Ordered schema migrations. Migration `n` (1-based) is applied when
/// `PRAGMA user_version < n`, and `user_version` is bumped to `n` afterwards.
pub const MIGRATIONS: &[&str] = &[
    // 1: embedding vector, JSON-encoded array of floats
    "ALTER TABLE images ADD COLUMN vector TEXT",
];
