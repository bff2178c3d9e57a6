// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emitted through the `metrics` facade; the embedding service installs the
//! recorder (Prometheus or otherwise). Covers:
//! - Operation outcomes and latency
//! - Replicas created and removed
//! - Copy-on-write conversions
//! - Adoptions on member removal
//! - Retries and audit findings
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `sharing_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Histograms track distributions (duration)
//!
//! # Usage
//!
//! ```rust,no_run
//! use sharing_engine::metrics;
//! use sharing_engine::registry::ItemKind;
//!
//! metrics::record_replicas_created(ItemKind::MISSION, "share", 3);
//! metrics::record_copy_on_write(ItemKind::MISSION, true);
//! ```

use crate::error::Result;
use crate::registry::ItemKind;
use metrics::{counter, histogram};
use std::time::Duration;

/// Record the outcome and latency of one engine operation.
pub fn record_operation<T>(operation: &'static str, result: &Result<T>, duration: Duration) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    };
    counter!("sharing_operations_total", "operation" => operation, "outcome" => outcome).increment(1);
    histogram!("sharing_operation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record replicas created (`share` or `backfill`).
pub fn record_replicas_created(kind: ItemKind, reason: &'static str, count: usize) {
    counter!("sharing_replicas_created_total", "kind" => kind.name(), "reason" => reason)
        .increment(count as u64);
}

/// Record replicas deleted (`unshare` or `delete`).
pub fn record_replicas_removed(kind: ItemKind, reason: &'static str, count: usize) {
    counter!("sharing_replicas_removed_total", "kind" => kind.name(), "reason" => reason)
        .increment(count as u64);
}

/// Record a replica converted to an owned item by an edit.
pub fn record_copy_on_write(kind: ItemKind, source_reverted: bool) {
    counter!("sharing_copy_on_write_total", "kind" => kind.name()).increment(1);
    if source_reverted {
        counter!("sharing_source_reverted_total", "kind" => kind.name()).increment(1);
    }
}

/// Record replicas kept as owned items on member removal.
pub fn record_adoptions(kind: ItemKind, count: usize) {
    counter!("sharing_adoptions_total", "kind" => kind.name()).increment(count as u64);
}

/// Record a retried operation (for SQLITE_BUSY/SQLITE_LOCKED and deadlines).
pub fn record_retry(operation: &str) {
    counter!("sharing_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record an audit run.
pub fn record_audit(violations: usize) {
    counter!("sharing_audits_total").increment(1);
    if violations > 0 {
        counter!("sharing_audit_violations_total").increment(violations as u64);
    }
}
