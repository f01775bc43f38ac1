//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Each ledger owns its registry, so several ledgers can live in one process.
//!
//! # Metrics
//!
//! - `ledger_votes_total{direction}` - Votes applied
//! - `ledger_rejections_total{reason}` - Operations rejected before any write
//! - `ledger_credits_reserved_total` - Credits debited for question priority
//! - `ledger_credits_released_total` - Credits paid out at question close
//! - `ledger_credits_withdrawn_total` - Credits removed at close by net negative votes
//! - `ledger_questions_closed_total` - Questions closed
//! - `ledger_operation_duration_seconds{operation}` - Latency including lock wait

use crate::types::VoteDirection;
use crate::Error;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Votes applied, by direction
    pub votes_total: IntCounterVec,

    /// Rejected operations, by reason
    pub rejections_total: IntCounterVec,

    /// Credits reserved
    pub credits_reserved: IntCounter,

    /// Credits released at close
    pub credits_released: IntCounter,

    /// Credits withdrawn at close
    pub credits_withdrawn: IntCounter,

    /// Questions closed
    pub questions_closed: IntCounter,

    /// Operation latency
    pub operation_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let votes_total = IntCounterVec::new(
            Opts::new("ledger_votes_total", "Votes applied"),
            &["direction"],
        )?;
        registry.register(Box::new(votes_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new(
                "ledger_rejections_total",
                "Operations rejected before any write",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let credits_reserved = IntCounter::new(
            "ledger_credits_reserved_total",
            "Credits debited for question priority",
        )?;
        registry.register(Box::new(credits_reserved.clone()))?;

        let credits_released = IntCounter::new(
            "ledger_credits_released_total",
            "Credits paid out at question close",
        )?;
        registry.register(Box::new(credits_released.clone()))?;

        let credits_withdrawn = IntCounter::new(
            "ledger_credits_withdrawn_total",
            "Credits removed at close by net negative votes",
        )?;
        registry.register(Box::new(credits_withdrawn.clone()))?;

        let questions_closed =
            IntCounter::new("ledger_questions_closed_total", "Questions closed")?;
        registry.register(Box::new(questions_closed.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Operation latency including lock wait",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            votes_total,
            rejections_total,
            credits_reserved,
            credits_released,
            credits_withdrawn,
            questions_closed,
            operation_duration,
            registry,
        })
    }

    /// Record an applied vote
    pub fn record_vote(&self, direction: VoteDirection) {
        self.votes_total.with_label_values(&[direction.as_str()]).inc();
    }

    /// Record a rejected operation if the error is a client error
    pub fn record_rejection(&self, error: &Error) {
        let reason = match error {
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::Conflict(_) => "conflict",
            Error::InvalidOperation(_) => "invalid_operation",
            Error::InsufficientCredits { .. } => "insufficient_credits",
            Error::Validation { .. } => "validation",
            _ => return,
        };
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    /// Record a credit reservation
    pub fn record_reservation(&self, charged: i64) {
        if charged > 0 {
            self.credits_reserved.inc_by(charged as u64);
        }
    }

    /// Record one author's payout at close
    pub fn record_payout(&self, applied: i64) {
        if applied >= 0 {
            self.credits_released.inc_by(applied as u64);
        } else {
            self.credits_withdrawn.inc_by(applied.unsigned_abs());
        }
    }

    /// Record a closed question
    pub fn record_question_closed(&self) {
        self.questions_closed.inc();
    }

    /// Start a latency timer for `operation`
    pub fn start_timer(&self, operation: &str) -> prometheus::HistogramTimer {
        self.operation_histogram(operation).start_timer()
    }

    fn operation_histogram(&self, operation: &str) -> Histogram {
        self.operation_duration.with_label_values(&[operation])
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("questions_closed", &self.questions_closed.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.credits_reserved.get(), 0);
        assert_eq!(metrics.questions_closed.get(), 0);
    }

    #[test]
    fn test_two_collectors_do_not_collide() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_question_closed();
        assert_eq!(first.questions_closed.get(), 1);
        assert_eq!(second.questions_closed.get(), 0);
    }

    #[test]
    fn test_record_vote() {
        let metrics = Metrics::new().unwrap();
        metrics.record_vote(VoteDirection::Up);
        metrics.record_vote(VoteDirection::Up);
        metrics.record_vote(VoteDirection::Down);
        assert_eq!(metrics.votes_total.with_label_values(&["up"]).get(), 2);
        assert_eq!(metrics.votes_total.with_label_values(&["down"]).get(), 1);
    }

    #[test]
    fn test_record_payout_splits_sign() {
        let metrics = Metrics::new().unwrap();
        metrics.record_payout(4);
        metrics.record_payout(-3);
        assert_eq!(metrics.credits_released.get(), 4);
        assert_eq!(metrics.credits_withdrawn.get(), 3);
    }

    #[test]
    fn test_internal_errors_are_not_rejections() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection(&Error::Storage("boom".to_string()));
        metrics.record_rejection(&Error::Conflict("closed".to_string()));
        assert_eq!(metrics.rejections_total.with_label_values(&["conflict"]).get(), 1);

        let families = metrics.registry().gather();
        let rejections = families
            .iter()
            .find(|family| family.get_name() == "ledger_rejections_total")
            .unwrap();
        assert_eq!(rejections.get_metric().len(), 1);
    }
}
