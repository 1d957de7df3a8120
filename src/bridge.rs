//! Subprocess implementation of [`GenerationBridge`].
//!
//! The worker is any program that speaks the JSON protocol in
//! [`documind_core::protocol`]:
//!
//! ```text
//! <command> [--endpoint URL] --check      → {"ok":true}
//! <command> [--endpoint URL] < request    → {"ok":true,"answer":"…","used_markers":[1]}
//! ```
//!
//! [`SubprocessBridge::summarize`] sends the same request shape with
//! `"mode":"summary"` and the document's pages as context.
//!
//! Each call spawns a fresh process with `kill_on_drop`, so a timed-out
//! worker is killed when its future is dropped.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use documind_core::bridge::GenerationBridge;
use documind_core::models::{Answer, Page, RetrievedContext};
use documind_core::prompt::{build_citations, context_items, parse_markers};
use documind_core::protocol::{
    BridgeRequest, BridgeResponse, ContextItem, GenerationConfig, GenerationMode, HealthStatus,
};
use documind_core::{Error, Result};

use crate::config::GenerationSettings;

/// Generation backend reached by spawning a worker process per request.
pub struct SubprocessBridge {
    command: Vec<String>,
    endpoint: Option<String>,
    timeout: Duration,
    check_timeout: Duration,
    healthy: AtomicBool,
}

impl SubprocessBridge {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            endpoint: None,
            timeout: Duration::from_secs(60),
            check_timeout: Duration::from_secs(8),
            healthy: AtomicBool::new(false),
        }
    }

    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self::new(settings.command.clone())
            .with_endpoint(settings.endpoint.clone().filter(|e| !e.is_empty()))
            .with_timeouts(
                Duration::from_secs(settings.timeout_secs),
                Duration::from_secs(settings.check_timeout_secs),
            )
    }

    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_timeouts(mut self, generate: Duration, check: Duration) -> Self {
        self.timeout = generate;
        self.check_timeout = check;
        self
    }

    fn command(&self, check: bool) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::BridgeUnavailable("no worker command configured".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(endpoint) = &self.endpoint {
            cmd.arg("--endpoint").arg(endpoint);
        }
        if check {
            cmd.arg("--check");
        }
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    async fn probe(&self) -> std::result::Result<(), String> {
        let mut cmd = self.command(true).map_err(|e| e.to_string())?;
        cmd.stdin(Stdio::null());
        let child = cmd
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", self.program(), e))?;

        let output = tokio::time::timeout(self.check_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                format!(
                    "health check timed out after {}s",
                    self.check_timeout.as_secs()
                )
            })?
            .map_err(|e| format!("health check failed: {}", e))?;

        let status: HealthStatus = last_json_line(&output.stdout).ok_or_else(|| {
            format!(
                "health check produced no status (exit {}): {}",
                output.status,
                stderr_text(&output.stderr)
            )
        })?;
        if status.ok {
            Ok(())
        } else {
            Err(status
                .error
                .unwrap_or_else(|| "worker reported unhealthy".to_string()))
        }
    }

    fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    /// Summarise one document from its extracted pages. Sampling follows
    /// [`GenerationConfig::summary`]; the result carries no citations.
    pub async fn summarize(
        &self,
        document_name: &str,
        pages: &[Page],
        model: &str,
    ) -> Result<String> {
        let context: Vec<ContextItem> = pages
            .iter()
            .filter(|p| !p.text.trim().is_empty())
            .enumerate()
            .map(|(i, p)| ContextItem {
                marker: i + 1,
                document_name: document_name.to_string(),
                page_number: p.number,
                text: p.text.clone(),
            })
            .collect();
        if context.is_empty() {
            return Err(Error::Extraction(format!(
                "{} has no extractable text",
                document_name
            )));
        }

        info!(file = %document_name, pages = context.len(), %model, "summarising document");
        let request = BridgeRequest {
            query: String::new(),
            context,
            config: GenerationConfig::summary(model),
            mode: GenerationMode::Summary,
        };
        let response = self.exchange(&request).await?;
        Ok(response.answer.unwrap_or_default().trim().to_string())
    }

    /// Send one request to a fresh worker and return its successful reply.
    async fn exchange(&self, request: &BridgeRequest) -> Result<BridgeResponse> {
        if !self.healthy.load(Ordering::SeqCst) {
            let status = self.health_check().await;
            if !status.ok {
                return Err(Error::BridgeUnavailable(
                    status.error.unwrap_or_else(|| "unhealthy".to_string()),
                ));
            }
        }

        let payload = serde_json::to_vec(request)
            .map_err(|e| Error::Generation(format!("failed to encode request: {}", e)))?;

        let mut cmd = self.command(false)?;
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| {
            Error::BridgeUnavailable(format!("failed to start {}: {}", self.program(), e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(error = %e, "worker closed stdin early");
                }
            });
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| Error::Generation(e.to_string()))?,
            Err(_) => {
                warn!(secs = self.timeout.as_secs(), "generation worker timed out");
                return Err(Error::GenerationTimeout(self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            return Err(Error::Generation(format!(
                "worker exited with {}: {}",
                output.status,
                stderr_text(&output.stderr)
            )));
        }

        let response: BridgeResponse = last_json_line(&output.stdout).ok_or_else(|| {
            Error::Generation(format!(
                "malformed worker response: {:?}",
                String::from_utf8_lossy(&output.stdout).trim()
            ))
        })?;

        if !response.ok {
            return Err(Error::Generation(
                response
                    .error
                    .unwrap_or_else(|| "worker reported failure".to_string()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationBridge for SubprocessBridge {
    async fn health_check(&self) -> HealthStatus {
        match self.probe().await {
            Ok(()) => {
                self.healthy.store(true, Ordering::SeqCst);
                HealthStatus::healthy()
            }
            Err(reason) => {
                self.healthy.store(false, Ordering::SeqCst);
                debug!(%reason, "generation backend unhealthy");
                HealthStatus::unhealthy(reason)
            }
        }
    }

    async fn generate(
        &self,
        query: &str,
        context: &RetrievedContext,
        config: &GenerationConfig,
    ) -> Result<Answer> {
        let request = BridgeRequest {
            query: query.to_string(),
            context: context_items(context),
            config: config.clone(),
            mode: GenerationMode::Chat,
        };
        info!(chunks = context.len(), model = %config.model, "generating answer");
        let response = self.exchange(&request).await?;

        let text = response.answer.unwrap_or_default().trim().to_string();
        let markers = response
            .used_markers
            .unwrap_or_else(|| parse_markers(&text));
        let citations = build_citations(&markers, context);

        Ok(Answer { text, citations })
    }
}

/// Parse the last non-empty stdout line as JSON.
fn last_json_line<T: serde::de::DeserializeOwned>(stdout: &[u8]) -> Option<T> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

fn stderr_text(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr).trim().to_string()
}
