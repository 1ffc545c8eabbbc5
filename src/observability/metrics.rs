use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub operations_total: IntCounterVec,
    pub operation_latency_seconds: HistogramVec,
    pub expirations_total: IntCounter,
    pub subscriptions_active: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "negotiation_operations_total",
                "Negotiation engine operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid negotiation_operations_total metric");

        let operation_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "negotiation_operation_latency_seconds",
                "Latency of negotiation engine operations in seconds",
            ),
            &["operation", "outcome"],
        )
        .expect("valid negotiation_operation_latency_seconds metric");

        let expirations_total = IntCounter::new(
            "negotiation_expirations_total",
            "Services removed by negotiation timeout",
        )
        .expect("valid negotiation_expirations_total metric");

        let subscriptions_active = IntGauge::new(
            "subscriptions_active",
            "Currently connected realtime subscriptions",
        )
        .expect("valid subscriptions_active metric");

        registry
            .register(Box::new(operations_total.clone()))
            .expect("register negotiation_operations_total");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("register negotiation_operation_latency_seconds");
        registry
            .register(Box::new(expirations_total.clone()))
            .expect("register negotiation_expirations_total");
        registry
            .register(Box::new(subscriptions_active.clone()))
            .expect("register subscriptions_active");

        Self {
            registry,
            operations_total,
            operation_latency_seconds,
            expirations_total,
            subscriptions_active,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
