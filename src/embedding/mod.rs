//! Embedding extraction through an external helper process.
//!
//! The helper receives an image path as its last argument and prints a JSON
//! array of numbers on stdout. Anything else (spawn failure, non-zero exit,
//! bad output, timeout) is reported as "no vector".

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::EmbeddingConfig;

/// Produces an embedding vector for an image file.
#[async_trait]
pub trait VectorExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Option<Vec<f32>>;
}

/// Runs a configured command per image.
#[derive(Debug, Clone)]
pub struct ProcessExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

/// Parse helper output into a non-empty vector of finite values.
pub fn parse_vector_output(stdout: &[u8]) -> Option<Vec<f32>> {
    let text = std::str::from_utf8(stdout).ok()?.trim();
    let vector: Vec<f32> = serde_json::from_str(text).ok()?;
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(vector)
}

#[async_trait]
impl VectorExtractor for ProcessExtractor {
    async fn extract(&self, path: &Path) -> Option<Vec<f32>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(program = %self.program, error = %e, "Failed to start embedding process");
                return None;
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(path = %path.display(), error = %e, "Embedding process failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), timeout_secs = self.timeout.as_secs(), "Embedding process timed out");
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                path = %path.display(),
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Embedding process exited with an error"
            );
            return None;
        }

        let vector = parse_vector_output(&output.stdout);
        if vector.is_none() {
            tracing::warn!(path = %path.display(), "Embedding process returned no usable vector");
        }
        vector
    }
}
