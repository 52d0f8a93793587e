//! Embeddings computed by an external program.
//!
//! The configured command is spawned once per text. The text is written to
//! its stdin and the embedding is read from stdout as JSON, either a bare
//! float array or an object with an `embedding` field. Batches fan out
//! through the bounded pool, and a per-item timeout fails only that item.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::embedder::{DEFAULT_MAX_CONCURRENCY, Embedder, Lifecycle, ProviderState};
use crate::error::{EmbedError, Result};

/// Configuration for [`ProcessEmbedder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessEmbedderConfig {
    /// Program to run. Bare names are looked up on `PATH`.
    pub command: String,
    /// Extra arguments passed on every invocation.
    pub args: Vec<String>,
    /// Output embedding dimensions.
    pub dimensions: usize,
    /// Concurrent child processes during batch fan-out.
    pub max_concurrency: usize,
    /// Per-item wall-clock timeout in seconds. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl Default for ProcessEmbedderConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            dimensions: 384,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout_secs: Some(30),
        }
    }
}

impl ProcessEmbedderConfig {
    pub fn new(command: impl Into<String>, dimensions: usize) -> Self {
        Self {
            command: command.into(),
            dimensions,
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProcessOutput {
    Bare(Vec<f32>),
    Wrapped { embedding: Vec<f32> },
}

/// Embedder backed by an external program.
#[derive(Debug)]
pub struct ProcessEmbedder {
    config: ProcessEmbedderConfig,
    program: PathBuf,
    lifecycle: Lifecycle,
}

impl ProcessEmbedder {
    /// Resolve the configured command.
    ///
    /// Fails with [`EmbedError::Configuration`] if it cannot be found.
    pub fn new(config: ProcessEmbedderConfig) -> Result<Self> {
        if config.command.trim().is_empty() {
            return Err(EmbedError::Configuration(
                "Process embedding provider requires [embedding.process] command".to_string(),
            ));
        }
        let program = resolve_program(&config.command).ok_or_else(|| {
            EmbedError::Configuration(format!(
                "Embedding command '{}' not found",
                config.command
            ))
        })?;

        Ok(Self {
            config,
            program,
            lifecycle: Lifecycle::new("process"),
        })
    }

    /// Absolute path of the program that will be spawned.
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run_once(&self, text: &str) -> Result<Vec<f32>> {
        let mut child = Command::new(&self.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EmbedError::ProviderUnavailable(format!(
                    "Failed to spawn {}: {e}",
                    self.program.display()
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| EmbedError::ProviderUnavailable(format!("stdin write failed: {e}")))?;
            // Dropping closes the pipe so the child sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EmbedError::ProviderUnavailable(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EmbedError::ProviderUnavailable(format!(
                "Embedding command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let vector = match serde_json::from_slice::<ProcessOutput>(&output.stdout)? {
            ProcessOutput::Bare(v) => v,
            ProcessOutput::Wrapped { embedding } => embedding,
        };

        if vector.len() != self.config.dimensions {
            return Err(EmbedError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

/// Find `command` either as a path or on `PATH`.
fn resolve_program(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

#[async_trait]
impl Embedder for ProcessEmbedder {
    async fn initialize(&self) -> Result<()> {
        if !self.lifecycle.begin_initialize()? {
            return Ok(());
        }
        // The program may have vanished since construction
        let available = self.program.is_file();
        self.lifecycle.finish_initialize(available);
        if !available {
            return Err(EmbedError::ProviderUnavailable(format!(
                "Embedding command {} is no longer available",
                self.program.display()
            )));
        }
        info!(program = %self.program.display(), "Process embedder ready");
        Ok(())
    }

    fn state(&self) -> ProviderState {
        self.lifecycle.state()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.lifecycle.ensure_ready()?;
        match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.run_once(text))
                .await
                .map_err(|_| {
                    debug!(timeout_secs = secs, "Embedding command timed out");
                    EmbedError::ProviderUnavailable(format!(
                        "Embedding command timed out after {secs}s"
                    ))
                })?,
            None => self.run_once(text).await,
        }
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "process"
    }

    fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    async fn dispose(&self) -> Result<()> {
        self.lifecycle.dispose();
        Ok(())
    }
}
