//! imgshelf: an image store with tagging, OCR and near-duplicate detection.

pub mod api;
pub mod config;
pub mod db;
pub mod embedding;
pub mod llm;
pub mod logging;
pub mod ocr;
pub mod server;
pub mod similarity;
pub mod storage;
pub mod tasks;
