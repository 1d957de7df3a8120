//! Query orchestration: embed → retrieve → assemble → generate.
//!
//! A run walks a fixed state machine and records every transition:
//!
//! ```text
//! Idle → Embedding → Retrieving → Assembling → Generating → Done
//!   └──────────┴───────────┴────────────┴────────────┴──→ Failed(reason)
//! ```
//!
//! An empty retrieval short-circuits `Assembling → Done` with a fixed
//! answer and no citations. Each stage runs under its own timeout, and a
//! [`CancelFlag`] is checked at every state boundary.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use documind_core::bridge::GenerationBridge;
use documind_core::embedding::Embedder;
use documind_core::models::{Answer, Query, RetrievedContext};
use documind_core::prompt::NO_CONTEXT_ANSWER;
use documind_core::protocol::GenerationConfig;
use documind_core::store::VectorIndex;
use documind_core::{Error, Result};

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryState {
    Idle,
    Embedding,
    Retrieving,
    Assembling,
    Generating,
    Done,
    Failed(String),
}

/// Cooperative cancellation shared between a caller and a running query.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-stage bounds.
#[derive(Debug, Clone, Copy)]
pub struct QueryTimeouts {
    pub embed: Duration,
    pub search: Duration,
    pub generate: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            embed: Duration::from_secs(30),
            search: Duration::from_secs(30),
            generate: Duration::from_secs(68),
        }
    }
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct QueryReport {
    pub answer: Answer,
    pub context: RetrievedContext,
    pub states: Vec<QueryState>,
}

/// A failed run: the error plus the transitions leading up to it.
#[derive(Debug)]
pub struct QueryFailure {
    pub error: Error,
    pub states: Vec<QueryState>,
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for QueryFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Transition log for one run.
struct Trace {
    states: Vec<QueryState>,
}

impl Trace {
    fn new() -> Self {
        Self {
            states: vec![QueryState::Idle],
        }
    }

    fn enter(&mut self, state: QueryState, cancel: &CancelFlag) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        debug!(?state, "query state");
        self.states.push(state);
        Ok(())
    }

    fn fail(mut self, error: Error) -> QueryFailure {
        self.states.push(QueryState::Failed(error.kind().to_string()));
        QueryFailure {
            error,
            states: self.states,
        }
    }
}

/// Wires the embedder, index and generation bridge into one query path.
pub struct QueryOrchestrator {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    bridge: Arc<dyn GenerationBridge>,
    generation: GenerationConfig,
    timeouts: QueryTimeouts,
}

impl QueryOrchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        bridge: Arc<dyn GenerationBridge>,
    ) -> Self {
        Self {
            embedder,
            index,
            bridge,
            generation: GenerationConfig::default(),
            timeouts: QueryTimeouts::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        bridge: Arc<dyn GenerationBridge>,
    ) -> Self {
        let g = &config.generation;
        Self::new(embedder, index, bridge)
            .with_generation_config(g.request_config())
            .with_timeouts(QueryTimeouts {
                embed: Duration::from_secs(config.retrieval.embed_timeout_secs),
                search: Duration::from_secs(config.retrieval.search_timeout_secs),
                // The bridge may probe health before generating.
                generate: Duration::from_secs(g.timeout_secs + g.check_timeout_secs),
            })
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_timeouts(mut self, timeouts: QueryTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Answer a question; the transition trace is discarded.
    pub async fn ask(&self, query: &Query) -> Result<Answer> {
        self.run(query, &CancelFlag::default())
            .await
            .map(|report| report.answer)
            .map_err(|failure| failure.error)
    }

    /// Embed and search only, without generation.
    pub async fn retrieve(&self, query: &Query) -> Result<RetrievedContext> {
        let vector = self.embed_query(&query.text).await?;
        self.search(&vector, query.k).await
    }

    /// Full run with the state trace.
    pub async fn run(
        &self,
        query: &Query,
        cancel: &CancelFlag,
    ) -> std::result::Result<QueryReport, QueryFailure> {
        let mut trace = Trace::new();
        match self.drive(query, cancel, &mut trace).await {
            Ok((answer, context)) => {
                info!(
                    chunks = context.len(),
                    citations = answer.citations.len(),
                    "query answered"
                );
                Ok(QueryReport {
                    answer,
                    context,
                    states: trace.states,
                })
            }
            Err(error) => {
                info!(kind = error.kind(), error = %error, "query failed");
                Err(trace.fail(error))
            }
        }
    }

    async fn drive(
        &self,
        query: &Query,
        cancel: &CancelFlag,
        trace: &mut Trace,
    ) -> Result<(Answer, RetrievedContext)> {
        trace.enter(QueryState::Embedding, cancel)?;
        let vector = self.embed_query(&query.text).await?;

        trace.enter(QueryState::Retrieving, cancel)?;
        let context = self.search(&vector, query.k).await?;

        trace.enter(QueryState::Assembling, cancel)?;
        if context.is_empty() {
            trace.enter(QueryState::Done, cancel)?;
            return Ok((
                Answer {
                    text: NO_CONTEXT_ANSWER.to_string(),
                    citations: Vec::new(),
                },
                context,
            ));
        }

        trace.enter(QueryState::Generating, cancel)?;
        let answer = bounded(
            self.timeouts.generate,
            self.bridge.generate(&query.text, &context, &self.generation),
            || Error::GenerationTimeout(self.timeouts.generate.as_secs()),
        )
        .await?;

        trace.enter(QueryState::Done, cancel)?;
        Ok((answer, context))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        bounded(self.timeouts.embed, self.embedder.embed(text), || {
            Error::Timeout {
                stage: "embedding",
                secs: self.timeouts.embed.as_secs(),
            }
        })
        .await
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<RetrievedContext> {
        let items = bounded(self.timeouts.search, self.index.search(vector, k), || {
            Error::Timeout {
                stage: "search",
                secs: self.timeouts.search.as_secs(),
            }
        })
        .await?;
        Ok(RetrievedContext { items })
    }
}

async fn bounded<T, F>(limit: Duration, fut: F, on_timeout: impl FnOnce() -> Error) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}
