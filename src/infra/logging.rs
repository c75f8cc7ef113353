pub fn init() {
    // Honor RUST_LOG if set, default to info. Logs go to stderr so stdio mode
    // keeps stdout for protocol frames.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Record a metric through the `metrics` facade and mirror it as a log line.
/// Names ending in `_total` are counters, everything else is a histogram.
pub fn log_metric(scope: &'static str, metric: &'static str, value: f64) {
    if metric.ends_with("_total") {
        metrics::counter!(metric, "scope" => scope).increment(value as u64);
    } else {
        metrics::histogram!(metric, "scope" => scope).record(value);
    }
    tracing::debug!(scope = scope, metric = metric, value = value, "metric");
}

/// Current value of a level-style metric, e.g. open sessions.
pub fn set_gauge(metric: &'static str, value: f64) {
    metrics::gauge!(metric).set(value);
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
    }

    #[test]
    fn metrics_without_recorder_are_noops() {
        super::log_metric("test", "calls_total", 1.0);
        super::log_metric("test", "latency_ms", 12.5);
        super::set_gauge("sessions_active", 3.0);
    }
}
