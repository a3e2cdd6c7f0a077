mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::utils::CircuitState;

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Per component (router or worker):
// - deliveries consumed and responses published, by status
// - broker publish failures
// - messages currently being processed
//
// Per router: messages forwarded, by destination queue.
//
// Per provider: adapter call latency, failures by reason, breaker state.
//
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub messages_consumed: IntCounterVec,
    pub responses_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub messages_in_flight: IntGaugeVec,

    pub messages_routed: IntCounterVec,

    pub adapter_call_duration: HistogramVec,
    pub adapter_failures: IntCounterVec,
    pub circuit_breaker_state: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_consumed = IntCounterVec::new(
            Opts::new("messages_consumed_total", "Deliveries taken from an input queue"),
            &["component"],
        )?;
        registry.register(Box::new(messages_consumed.clone()))?;

        let responses_published = IntCounterVec::new(
            Opts::new("responses_published_total", "Response envelopes published"),
            &["component", "status"],
        )?;
        registry.register(Box::new(responses_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("publish_failures_total", "Publishes rejected by the broker"),
            &["component"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let messages_in_flight = IntGaugeVec::new(
            Opts::new("messages_in_flight", "Deliveries received but not yet acknowledged"),
            &["component"],
        )?;
        registry.register(Box::new(messages_in_flight.clone()))?;

        let messages_routed = IntCounterVec::new(
            Opts::new("messages_routed_total", "Requests forwarded to a provider queue"),
            &["router", "destination"],
        )?;
        registry.register(Box::new(messages_routed.clone()))?;

        let adapter_call_duration = HistogramVec::new(
            HistogramOpts::new("adapter_call_duration_seconds", "External provider call latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )?;
        registry.register(Box::new(adapter_call_duration.clone()))?;

        let adapter_failures = IntCounterVec::new(
            Opts::new("adapter_failures_total", "Requests answered with an error envelope"),
            &["provider", "reason"],
        )?;
        registry.register(Box::new(adapter_failures.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["provider"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            messages_consumed,
            responses_published,
            publish_failures,
            messages_in_flight,
            messages_routed,
            adapter_call_duration,
            adapter_failures,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_consumed(&self, component: &str) {
        self.messages_consumed.with_label_values(&[component]).inc();
        self.messages_in_flight.with_label_values(&[component]).inc();
    }

    /// A response was published and its input acknowledged.
    pub fn record_responded(&self, component: &str, status: &str) {
        self.responses_published
            .with_label_values(&[component, status])
            .inc();
        self.messages_in_flight.with_label_values(&[component]).dec();
    }

    /// Deliveries left unacknowledged when a component stops on a broker
    /// error. The broker redelivers them.
    pub fn record_abandoned(&self, component: &str, count: usize) {
        self.messages_in_flight
            .with_label_values(&[component])
            .sub(count as i64);
    }

    pub fn record_publish_failure(&self, component: &str) {
        self.publish_failures.with_label_values(&[component]).inc();
    }

    pub fn record_routed(&self, router: &str, destination: &str) {
        self.messages_routed
            .with_label_values(&[router, destination])
            .inc();
    }

    pub fn record_adapter_call(&self, provider: &str, duration_secs: f64) {
        self.adapter_call_duration
            .with_label_values(&[provider])
            .observe(duration_secs);
    }

    pub fn record_failure(&self, provider: &str, reason: &str) {
        self.adapter_failures
            .with_label_values(&[provider, reason])
            .inc();
    }

    pub fn update_circuit_state(&self, provider: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[provider])
            .set(state.as_gauge());
    }
}
