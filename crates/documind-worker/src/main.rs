//! # DocuMind generation worker (`dmind-worker`)
//!
//! Runs in its own process so the model client and its dependencies stay
//! out of the retrieval host. Speaks one JSON object each way:
//!
//! ```bash
//! dmind-worker --check                      # {"ok":true} when Ollama answers
//! dmind-worker < request.json               # {"ok":true,"answer":"…","used_markers":[1]}
//! dmind-worker --endpoint http://gpu:11434  # non-default Ollama server
//! ```
//!
//! A request with `"mode":"summary"` asks for a short summary of its
//! context instead of a cited answer; its reply reports no markers.
//!
//! Backend failures are reported as `{"ok":false,"error":"…"}` with exit
//! status 0. Only unreadable input exits non-zero. Logs go to stderr.

use std::io::Read;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use documind_core::prompt::{
    build_summary_prompt, build_user_prompt, parse_markers, SUMMARY_SYSTEM_PROMPT, SYSTEM_PROMPT,
};
use documind_core::protocol::{BridgeRequest, BridgeResponse, GenerationMode, HealthStatus};

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

#[derive(Parser)]
#[command(
    name = "dmind-worker",
    about = "DocuMind generation worker (reads a JSON request on stdin)",
    version
)]
struct Args {
    /// Probe the model server and exit.
    #[arg(long)]
    check: bool,

    /// Ollama base URL.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// HTTP timeout for a chat request, in seconds.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    let base = args.endpoint.trim_end_matches('/').to_string();

    if args.check {
        let status = match check(&base).await {
            Ok(()) => HealthStatus::healthy(),
            Err(e) => HealthStatus::unhealthy(format!("{:#}", e)),
        };
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;
    let request: BridgeRequest =
        serde_json::from_str(&input).context("request is not a valid bridge request")?;

    let response = match chat(&base, &request, Duration::from_secs(args.timeout_secs)).await {
        Ok(answer) => {
            let used = match request.mode {
                GenerationMode::Chat => cited_markers(&answer, request.context.len()),
                GenerationMode::Summary => Vec::new(),
            };
            BridgeResponse::answer(answer, used)
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "generation failed");
            BridgeResponse::failure(format!("{:#}", e))
        }
    };
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

/// `GET /api/tags` succeeds when the server is up.
async fn check(base: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let response = client
        .get(format!("{}/api/tags", base))
        .send()
        .await
        .with_context(|| format!("cannot reach {}", base))?;
    if !response.status().is_success() {
        bail!("{} returned {}", base, response.status());
    }
    Ok(())
}

fn chat_body(request: &BridgeRequest) -> serde_json::Value {
    let (system, user) = match request.mode {
        GenerationMode::Chat => (
            SYSTEM_PROMPT,
            build_user_prompt(&request.query, &request.context),
        ),
        GenerationMode::Summary => (
            SUMMARY_SYSTEM_PROMPT,
            build_summary_prompt(&request.context),
        ),
    };
    serde_json::json!({
        "model": request.config.model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ],
        "stream": false,
        "options": {
            "temperature": request.config.temperature,
            "num_predict": request.config.max_tokens,
        },
    })
}

async fn chat(base: &str, request: &BridgeRequest, timeout: Duration) -> Result<String> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    debug!(
        model = %request.config.model,
        mode = ?request.mode,
        chunks = request.context.len(),
        "sending chat request"
    );

    let response = client
        .post(format!("{}/api/chat", base))
        .json(&chat_body(request))
        .send()
        .await
        .with_context(|| format!("cannot reach {}", base))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("model server returned {}: {}", status, body.trim());
    }

    let reply: ChatResponse = response
        .json()
        .await
        .context("unexpected chat response shape")?;
    Ok(reply.message.content.trim().to_string())
}

/// Markers in `answer` that point at a chunk that was actually sent.
fn cited_markers(answer: &str, context_len: usize) -> Vec<usize> {
    parse_markers(answer)
        .into_iter()
        .filter(|m| (1..=context_len).contains(m))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use documind_core::protocol::{ContextItem, GenerationConfig};

    fn request() -> BridgeRequest {
        BridgeRequest {
            query: "What color is the sky?".into(),
            context: vec![ContextItem {
                marker: 1,
                document_name: "sky.txt".into(),
                page_number: 1,
                text: "The sky is blue.".into(),
            }],
            config: GenerationConfig::default(),
            mode: GenerationMode::Chat,
        }
    }

    #[test]
    fn chat_body_carries_options_and_context() {
        let body = chat_body(&request());
        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 500);
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("[1] (Document: sky.txt, Page: 1)"));
        assert!(user.contains("Question: What color is the sky?"));
    }

    #[test]
    fn summary_body_uses_summary_prompt_and_sampling() {
        let request = BridgeRequest {
            query: String::new(),
            context: vec![ContextItem {
                marker: 1,
                document_name: "report.pdf".into(),
                page_number: 1,
                text: "Quarterly revenue grew.".into(),
            }],
            config: GenerationConfig::summary("llama3.1:8b"),
            mode: GenerationMode::Summary,
        };
        let body = chat_body(&request);
        assert_eq!(body["messages"][0]["content"], SUMMARY_SYSTEM_PROMPT);
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("Please provide a concise summary"));
        assert!(user.contains("Quarterly revenue grew."));
        assert!(!user.contains("Question:"));
        assert_eq!(body["options"]["temperature"], 0.5);
        assert_eq!(body["options"]["num_predict"], 200);
    }

    #[test]
    fn only_known_markers_are_reported() {
        assert_eq!(cited_markers("Blue [1], see also [4].", 1), vec![1]);
        assert!(cited_markers("No citations.", 3).is_empty());
    }

    #[test]
    fn chat_reply_parses() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{"model":"llama3.1:8b","message":{"role":"assistant","content":" Blue [1]. "},"done":true}"#,
        )
        .unwrap();
        assert_eq!(reply.message.content.trim(), "Blue [1].");
    }
}
