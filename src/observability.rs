//! Observability module for run correlation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier shared by every log line, metric and key file of one launch run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// Create a new run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in file labels
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stage span data carried into structured logs
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: RunId,
    pub stage: &'static str,
    pub started_at: DateTime<Utc>,
}

impl StageContext {
    pub fn new(run_id: &RunId, stage: &'static str) -> Self {
        Self {
            run_id: run_id.clone(),
            stage,
            started_at: Utc::now(),
        }
    }

    /// Milliseconds since the stage started
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}
