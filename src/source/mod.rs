//! Candidate sources.
//!
//! Defines the `CandidateSource` trait the scan engine pulls raw
//! opportunities from, and an HTTP implementation over the analytics API.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Candidate, ScanMode};

/// Abstraction over the upstream analytics provider.
///
/// Implementors may fail or stall arbitrarily; the engine isolates each
/// (chain, mode) fetch so one failure never aborts a scan.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Fetch up to `limit` raw candidates for one chain and mode.
    async fn fetch_candidates(
        &self,
        chain: &str,
        mode: ScanMode,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    /// Deep-analysis lookup for a single token (best-effort enrichment).
    async fn analyze_token(&self, chain: &str, token: &str) -> Result<serde_json::Value>;

    /// Source name for logging and identification.
    fn name(&self) -> &'static str;
}
