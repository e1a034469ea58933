use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub similarity: SimilarityConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL used when building the public URL of an uploaded file.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_public_url() -> String {
    "http://localhost:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    data_dir().join("imgshelf.db")
}

fn default_uploads_dir() -> PathBuf {
    data_dir().join("uploads")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imgshelf")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityStrategy {
    /// Cosine similarity over stored embedding vectors.
    #[default]
    Vector,
    /// Hamming distance over 16x16 perceptual hashes computed at scan time.
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    #[serde(default)]
    pub strategy: SimilarityStrategy,

    #[serde(default = "default_similarity_threshold")]
    pub default_threshold: f64,
}

fn default_similarity_threshold() -> f64 {
    0.92
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            strategy: SimilarityStrategy::default(),
            default_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Program that prints a JSON array of floats for the image path given as its last argument.
    #[serde(default = "default_embedding_program")]
    pub program: String,

    #[serde(default = "default_embedding_args")]
    pub args: Vec<String>,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Number of embedding processes allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_embedding_program() -> String {
    "python3".to_string()
}

fn default_embedding_args() -> Vec<String> {
    vec!["scripts/extract_vector.py".to_string()]
}

fn default_embedding_timeout() -> u64 {
    120
}

fn default_max_concurrent() -> usize {
    1
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            program: default_embedding_program(),
            args: default_embedding_args(),
            timeout_secs: default_embedding_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_tesseract_program")]
    pub tesseract_program: String,

    #[serde(default = "default_ocr_language")]
    pub default_language: String,

    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

fn default_tesseract_program() -> String {
    "tesseract".to_string()
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_ocr_timeout() -> u64 {
    60
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_program: default_tesseract_program(),
            default_language: default_ocr_language(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

pub const DEFAULT_LLM_SYSTEM_PROMPT: &str = r#"You are an OCR assistant. Analyze the provided image and respond strictly in JSON.

Return JSON with this exact structure:
{
    "ocr_text": "string",
    "suggested_tags": ["string", ...]
}

Guidelines:
- suggested_tags must be an array of concise lowercase tags (maximum 5 entries).
- Preserve line breaks inside ocr_text.
- Use empty string for ocr_text when no text is detected and an empty array for suggested_tags.
- Do not include any explanation or commentary outside the JSON response.
- Do not return HTML or markdown formatting."#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_system_prompt() -> String {
    DEFAULT_LLM_SYSTEM_PROMPT.to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            system_prompt: default_llm_system_prompt(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Partial update of the LLM settings, as sent by the settings page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfigUpdate {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
}

impl LlmConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// Apply a partial update. Returns true if any field changed.
    pub fn apply(&mut self, update: LlmConfigUpdate) -> bool {
        let mut changed = false;
        if let Some(base_url) = update.base_url {
            self.base_url = base_url;
            changed = true;
        }
        if let Some(model) = update.model {
            self.model = model;
            changed = true;
        }
        if let Some(api_key) = update.api_key {
            self.api_key = Some(api_key);
            changed = true;
        }
        if let Some(prompt) = update.system_prompt {
            self.system_prompt = decode_system_prompt(&prompt);
            changed = true;
        }
        changed
    }

    /// Overlay `LLM_*` environment variables on top of the file configuration.
    pub fn apply_env(&mut self) {
        if let Ok(base_url) = std::env::var("LLM_BASE_URL") {
            self.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("LLM_API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.model = model;
        }
        if let Ok(prompt) = std::env::var("LLM_SYSTEM_PROMPT") {
            self.system_prompt = decode_system_prompt(&prompt);
        }
    }
}

/// Literal `\n` sequences become newlines; a blank prompt falls back to the default.
pub fn decode_system_prompt(value: &str) -> String {
    let unescaped = value.replace("\\n", "\n");
    if unescaped.trim().is_empty() {
        DEFAULT_LLM_SYSTEM_PROMPT.to_string()
    } else {
        unescaped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Send logs to systemd-journald when available (Linux only).
    #[serde(default)]
    pub journald: bool,

    /// Write daily rolling log files here instead of stderr.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            similarity: SimilarityConfig::default(),
            embedding: EmbeddingConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, writing a default config there if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.llm.apply_env();
        Ok(config)
    }

    /// Read the file as written, without environment overrides.
    fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply `update` to the `[llm]` section of the file at `path`, keeping
    /// every other field as written. Environment overrides never reach the file.
    pub fn persist_llm(path: &Path, update: &LlmConfigUpdate) -> Result<()> {
        let mut config = Self::read_file(path)?;
        config.llm.apply(update.clone());
        config.save_to(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;

        Ok(())
    }

    /// Default location, honoring `IMGSHELF_CONFIG`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("IMGSHELF_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imgshelf")
    }
}
