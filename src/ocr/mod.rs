//! Local OCR with the tesseract command line tool.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::OcrConfig;

#[derive(Debug, Clone)]
pub struct Tesseract {
    program: String,
    default_language: String,
    timeout: Duration,
}

/// Language codes are passed straight to tesseract, so keep them to the
/// characters its traineddata names use (`eng`, `chi_sim`, `eng+deu`).
pub fn is_valid_language(language: &str) -> bool {
    !language.is_empty()
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+')
}

/// Removes the scratch file on drop
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

impl Tesseract {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            program: config.tesseract_program.clone(),
            default_language: config.default_language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// The language to use for a request: trimmed input, or the default when blank.
    pub fn language_for(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .unwrap_or(self.default_language.as_str())
            .to_string()
    }

    /// Recognize text in an uploaded image. Returns the trimmed text.
    pub async fn recognize(&self, bytes: &[u8], language: &str) -> Result<String> {
        if !is_valid_language(language) {
            bail!("Invalid OCR language: {}", language);
        }

        let scratch = ScratchFile(std::env::temp_dir().join(format!("imgshelf-ocr-{}", Uuid::new_v4())));
        tokio::fs::write(&scratch.0, bytes)
            .await
            .context("Failed to write OCR input")?;

        let child = Command::new(&self.program)
            .arg(&scratch.0)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("OCR timed out after {}s", self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(status = %output.status, stderr = %stderr.trim(), "tesseract failed");
            bail!("tesseract exited with {}", output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(program: &str, timeout_secs: u64) -> Tesseract {
        Tesseract::from_config(&OcrConfig {
            tesseract_program: program.to_string(),
            default_language: "eng".to_string(),
            timeout_secs,
        })
    }

    #[test]
    fn test_language_for() {
        let ocr = engine("tesseract", 60);
        assert_eq!(ocr.language_for(None), "eng");
        assert_eq!(ocr.language_for(Some("  ")), "eng");
        assert_eq!(ocr.language_for(Some(" deu ")), "deu");
    }

    #[test]
    fn test_language_validation() {
        assert!(is_valid_language("eng"));
        assert!(is_valid_language("chi_sim+eng"));
        assert!(!is_valid_language(""));
        assert!(!is_valid_language("eng; rm -rf /"));
    }

    #[tokio::test]
    async fn test_rejects_bad_language_before_spawning() {
        let ocr = engine("/nonexistent/tesseract", 60);
        let err = ocr.recognize(b"img", "../eng").await.unwrap_err();
        assert!(err.to_string().contains("Invalid OCR language"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let ocr = engine("/nonexistent/tesseract", 60);
        assert!(ocr.recognize(b"img", "eng").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_trimmed() {
        // `echo` stands in for tesseract and prints its arguments
        let ocr = engine("echo", 10);
        let text = ocr.recognize(b"img", "eng").await.unwrap();
        assert!(text.ends_with("stdout -l eng"));
        assert!(!text.ends_with('\n'));
    }
}
