// Prometheus counters for the submission surface, served at GET /metrics
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "arbiter_submissions_total",
        "Solutions accepted for grading",
        &["language"]
    )
    .expect("metric registration");
    pub static ref REJECTED_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "arbiter_rejected_submissions_total",
        "Submissions rejected before queueing",
        &["reason"]
    )
    .expect("metric registration");
    pub static ref REGRADES_TOTAL: IntCounter = register_int_counter!(
        "arbiter_regrades_total",
        "Regrade requests queued"
    )
    .expect("metric registration");
}

/// Render the default registry in the text exposition format
pub fn export() -> String {
    // Touch the statics so they show up before the first increment
    lazy_static::initialize(&SUBMISSIONS_TOTAL);
    lazy_static::initialize(&REJECTED_SUBMISSIONS_TOTAL);
    lazy_static::initialize(&REGRADES_TOTAL);

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }
    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_counters() {
        REGRADES_TOTAL.inc();
        let text = export();
        assert!(text.contains("arbiter_regrades_total"));
        assert!(text.contains("# TYPE arbiter_regrades_total counter"));
    }
}
