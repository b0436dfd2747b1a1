//! Structured logging for launch stages

use crate::observability::{RunId, StageContext};

/// Structured logger for run events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    run_id: RunId,
}

impl StructuredLogger {
    pub fn new(run_id: RunId) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn stage_started(&self, stage: &'static str) -> StageContext {
        tracing::info!(
            run_id = %self.run_id,
            stage = stage,
            "Stage started"
        );
        StageContext::new(&self.run_id, stage)
    }

    pub fn stage_completed(&self, ctx: &StageContext, detail: &str) {
        tracing::info!(
            run_id = %self.run_id,
            stage = ctx.stage,
            latency_ms = ctx.elapsed_ms(),
            detail = %detail,
            "Stage completed"
        );
    }

    pub fn stage_failed(&self, ctx: &StageContext, error: &dyn std::fmt::Display, last_state: &str) {
        tracing::error!(
            run_id = %self.run_id,
            stage = ctx.stage,
            latency_ms = ctx.elapsed_ms(),
            error = %error,
            last_state = %last_state,
            "Stage failed"
        );
    }

    pub fn log_identities_persisted(&self, label: &str, count: usize) {
        tracing::info!(
            run_id = %self.run_id,
            label = %label,
            count = count,
            "Identity secrets persisted"
        );
    }

    pub fn log_group_packed(&self, index: usize, operations: usize, bytes: usize, compute_units: u32) {
        tracing::debug!(
            run_id = %self.run_id,
            group = index,
            operations = operations,
            bytes = bytes,
            compute_units = compute_units,
            "Transaction group packed"
        );
    }

    pub fn log_bundle_outcome(&self, signature: &str, outcome: &str) {
        tracing::info!(
            run_id = %self.run_id,
            signature = %signature,
            outcome = %outcome,
            "Bundle outcome"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            run_id = %self.run_id,
            message = %message,
            "Warning"
        );
    }
}
