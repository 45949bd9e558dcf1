//! Instrumentation
//!
//! With the `metrics` feature, applies record OpenTelemetry instruments into
//! a Prometheus registry ([`METRICS`]). With the `tracing` feature, the
//! executor and the Postgres driver enter the spans in [`tracing_helpers`].

#[cfg(feature = "metrics")]
pub use otel::{LockplaneMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use std::time::Duration;

    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Registry, TextEncoder};

    pub static METRICS: Lazy<LockplaneMetrics> = Lazy::new(LockplaneMetrics::init);

    pub struct LockplaneMetrics {
        pub registry: Registry,
        /// Owns the Prometheus reader; instruments stop exporting once it drops.
        _provider: SdkMeterProvider,
        pub applies_total: Counter<u64>,
        pub apply_failures_total: Counter<u64>,
        pub steps_total: Counter<u64>,
        pub step_duration: Histogram<f64>,
        pub lock_wait_duration: Histogram<f64>,
    }

    impl LockplaneMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => SdkMeterProvider::builder().with_reader(exporter).build(),
                Err(e) => {
                    log::warn!("prometheus exporter unavailable, metrics are not exported: {e}");
                    SdkMeterProvider::builder().build()
                }
            };
            let meter = provider.meter("lockplane");

            let applies_total = meter
                .u64_counter("lockplane_applies_total")
                .with_description("Plans submitted for apply")
                .build();

            let apply_failures_total = meter
                .u64_counter("lockplane_apply_failures_total")
                .with_description("Applies that ended in an error, by error kind")
                .build();

            let steps_total = meter
                .u64_counter("lockplane_steps_total")
                .with_description("Plan steps executed, by phase")
                .build();

            let step_duration = meter
                .f64_histogram("lockplane_step_duration_seconds")
                .with_description("Duration of plan steps")
                .build();

            let lock_wait_duration = meter
                .f64_histogram("lockplane_lock_wait_seconds")
                .with_description("Time spent waiting for the advisory lock")
                .build();

            Self {
                registry,
                _provider: provider,
                applies_total,
                apply_failures_total,
                steps_total,
                step_duration,
                lock_wait_duration,
            }
        }

        pub fn record_apply(&self) {
            self.applies_total.add(1, &[]);
        }

        pub fn record_apply_failure(&self, kind: &'static str) {
            self.apply_failures_total.add(1, &[KeyValue::new("kind", kind)]);
        }

        pub fn record_step(&self, phase: &'static str, elapsed: Duration) {
            let attributes = [KeyValue::new("phase", phase)];
            self.steps_total.add(1, &attributes);
            self.step_duration.record(elapsed.as_secs_f64(), &attributes);
        }

        pub fn record_lock_wait(&self, elapsed: Duration) {
            self.lock_wait_duration.record(elapsed.as_secs_f64(), &[]);
        }

        /// Prometheus text exposition of everything recorded so far.
        pub fn render(&self) -> String {
            TextEncoder::new()
                .encode_to_string(&self.registry.gather())
                .unwrap_or_default()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn recorded_instruments_are_exported() {
            METRICS.record_apply();
            METRICS.record_step("target", Duration::from_millis(5));
            let text = METRICS.render();
            assert!(text.contains("lockplane_applies_total"));
            assert!(text.contains("lockplane_step_duration_seconds"));
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{debug_span, info_span, Span};

    const SQL_PREVIEW: usize = 120;

    fn preview(sql: &str) -> &str {
        match sql.char_indices().nth(SQL_PREVIEW) {
            Some((end, _)) => &sql[..end],
            None => sql,
        }
    }

    pub fn connect_span() -> Span {
        info_span!("lockplane.connect")
    }

    pub fn introspect_span(driver: &'static str) -> Span {
        debug_span!("lockplane.introspect", driver)
    }

    pub fn execute_statement_span(sql: &str) -> Span {
        debug_span!("lockplane.exec", sql = preview(sql))
    }

    pub fn apply_span(apply_id: &str, steps: usize) -> Span {
        info_span!("lockplane.apply", apply_id, steps)
    }

    pub fn phase_span(phase: &'static str) -> Span {
        info_span!("lockplane.phase", phase)
    }

    pub fn step_span(phase: &'static str, index: usize, description: &str) -> Span {
        debug_span!("lockplane.step", phase, index, description)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn long_statements_are_truncated() {
            let sql = "x".repeat(500);
            assert_eq!(preview(&sql).len(), SQL_PREVIEW);
            assert_eq!(preview("SELECT 1"), "SELECT 1");
        }
    }
}
