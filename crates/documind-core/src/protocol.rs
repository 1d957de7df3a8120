//! Wire types exchanged with the generation backend process.
//!
//! One JSON object travels each way per invocation: a [`BridgeRequest`] on
//! the worker's stdin and a [`BridgeResponse`] on its stdout. The health
//! probe prints a [`HealthStatus`].
//!
//! A request is either a question over retrieved chunks (`"mode":"chat"`,
//! the default when `mode` is absent) or a summary of one document's pages
//! (`"mode":"summary"`).

use serde::{Deserialize, Serialize};

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default generation length bound, in tokens.
pub const DEFAULT_MAX_TOKENS: u32 = 500;
/// Default model tag.
pub const DEFAULT_MODEL: &str = "llama3.1:8b";
/// Sampling temperature for document summaries.
pub const SUMMARY_TEMPERATURE: f32 = 0.5;
/// Length bound for document summaries, in tokens.
pub const SUMMARY_MAX_TOKENS: u32 = 200;

/// Generation parameters forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl GenerationConfig {
    /// Shorter, cooler sampling used for document summaries.
    pub fn summary(model: impl Into<String>) -> Self {
        Self {
            temperature: SUMMARY_TEMPERATURE,
            max_tokens: SUMMARY_MAX_TOKENS,
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Answer `query` from the context, citing markers.
    #[default]
    Chat,
    /// Summarise the context; `query` is ignored.
    Summary,
}

/// One retrieved chunk as presented to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// 1-based position in retrieval order; rendered as `[marker]`.
    pub marker: usize,
    pub document_name: String,
    pub page_number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub query: String,
    pub context: Vec<ContextItem>,
    pub config: GenerationConfig,
    #[serde(default)]
    pub mode: GenerationMode,
}

/// Worker reply. `answer` is set when `ok`, `error` otherwise.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Markers the backend reports as used. When absent the host scans the
    /// answer text instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_markers: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn answer(answer: impl Into<String>, used_markers: Vec<usize>) -> Self {
        Self {
            ok: true,
            answer: Some(answer.into()),
            used_markers: Some(used_markers),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Result of a side-effect-free reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
