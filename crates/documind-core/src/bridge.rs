//! Process-boundary abstraction for answer generation.
//!
//! The retrieval side never links the model runtime. It only talks to a
//! [`GenerationBridge`], which in production is a worker subprocess with its
//! own dependency set.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Answer, RetrievedContext};
use crate::protocol::{GenerationConfig, HealthStatus};

/// Isolated generation backend.
///
/// Implementations never retry on their own; the caller decides.
#[async_trait]
pub trait GenerationBridge: Send + Sync {
    /// Probe reachability without generating anything.
    async fn health_check(&self) -> HealthStatus;

    /// Produce an answer grounded in `context`, with citations drawn only
    /// from the chunks in `context`.
    async fn generate(
        &self,
        query: &str,
        context: &RetrievedContext,
        config: &GenerationConfig,
    ) -> Result<Answer>;
}
