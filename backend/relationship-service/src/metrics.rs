/// Prometheus metrics for relationship-service
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

/// Follow toggles (labels: outcome=followed|unfollowed|failed)
pub static FOLLOW_TOGGLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relationship_follow_toggles_total",
        "Total number of follow toggles",
        &["outcome"]
    )
    .expect("metric can be registered")
});

/// Edges left one-sided because the second write failed
pub static ASYMMETRIC_EDGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relationship_asymmetric_edges_total",
        "Edges left asymmetric after a failed target-side write",
        &["operation"]
    )
    .expect("metric can be registered")
});

/// Optimistic version conflicts seen by retrying operations
pub static VERSION_CONFLICTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relationship_version_conflicts_total",
        "Version-checked saves rejected as stale"
    )
    .expect("metric can be registered")
});

/// Account deletions (labels: status=clean|partial|noop|failed)
pub static ACCOUNT_DELETIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relationship_account_deletions_total",
        "Total number of account deletion runs",
        &["status"]
    )
    .expect("metric can be registered")
});

/// Issues recorded during deletion cascades (labels: step)
pub static DELETION_ISSUES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relationship_deletion_issues_total",
        "Best-effort deletion steps that failed",
        &["step"]
    )
    .expect("metric can be registered")
});

/// Reconciliation repairs (labels: kind=back_edge_added|back_edge_removed|dangling_removed)
pub static RECONCILE_REPAIRS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relationship_reconcile_repairs_total",
        "Edges repaired by the reconciliation pass",
        &["kind"]
    )
    .expect("metric can be registered")
});

/// Password reset token lifecycle (labels: outcome)
pub static RESET_TOKENS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relationship_reset_tokens_total",
        "Password reset token issue/consume outcomes",
        &["outcome"]
    )
    .expect("metric can be registered")
});

/// Render the default registry in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_gather() {
        FOLLOW_TOGGLES_TOTAL.with_label_values(&["followed"]).inc();
        RESET_TOKENS_TOTAL.with_label_values(&["issued"]).inc();

        let text = gather_metrics();
        assert!(text.contains("relationship_follow_toggles_total"));
        assert!(text.contains("relationship_reset_tokens_total"));
    }
}
