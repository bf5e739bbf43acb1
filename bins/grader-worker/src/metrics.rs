// Prometheus metrics for the grader worker

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Finished evaluations by terminal status, or "skipped"
    pub static ref EVALUATIONS: CounterVec = CounterVec::new(
        Opts::new("grader_evaluations_total", "Total number of finished evaluations"),
        &["status"]
    )
    .expect("metric can be created");

    // Sandbox runs by language and outcome
    pub static ref SANDBOX_EXECUTIONS: CounterVec = CounterVec::new(
        Opts::new("grader_sandbox_executions_total", "Total number of sandbox runs"),
        &["language", "outcome"]
    )
    .expect("metric can be created");

    pub static ref SANDBOX_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "grader_sandbox_duration_ms",
            "Sandbox run wall time in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        &["language"]
    )
    .expect("metric can be created");

    // Submissions scheduled but not finished
    pub static ref IN_FLIGHT: IntGauge = IntGauge::new(
        "grader_evaluations_in_flight",
        "Submissions scheduled and not yet finished"
    )
    .expect("metric can be created");
}

/// Register every collector; call once at startup
pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(EVALUATIONS.clone()))?;
    REGISTRY.register(Box::new(SANDBOX_EXECUTIONS.clone()))?;
    REGISTRY.register(Box::new(SANDBOX_DURATION.clone()))?;
    REGISTRY.register(Box::new(IN_FLIGHT.clone()))?;
    Ok(())
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_evaluation(status: &str) {
    EVALUATIONS.with_label_values(&[status]).inc();
}

pub fn record_sandbox_execution(language: &str, outcome: &str, duration_ms: f64) {
    SANDBOX_EXECUTIONS.with_label_values(&[language, outcome]).inc();
    SANDBOX_DURATION.with_label_values(&[language]).observe(duration_ms);
}

pub fn set_in_flight(count: usize) {
    IN_FLIGHT.set(count as i64);
}
