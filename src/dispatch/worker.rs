use futures_util::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::adapter::ProviderAdapter;
use super::error::ProcessError;
use crate::health::{HealthRegistry, HealthStatus};
use crate::messaging::{Broker, BrokerError, Delivery, DeliveryTag};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerError};

// ============================================================================
// Worker
// ============================================================================
//
// Binds one input queue, one output queue and one provider adapter.
//
// Lifecycle of a delivery:
//   Received -> Decoding -> (Validated | Rejected) -> Invoking
//            -> (Responded-Success | Responded-Error) -> Acknowledged
//
// Decode, validation and the adapter call run on a pool of at most
// `max_in_flight` tasks. Only the run loop publishes and acks, always
// publish first. Provider success payloads are published verbatim; every
// failure, including a panic in the task, becomes
// {"status":"error","message":...}. A broker failure ends the loop with
// the affected delivery unacked.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub input: String,
    pub output: String,
    pub adapter_timeout: Duration,
    pub max_in_flight: usize,
}

impl WorkerConfig {
    pub fn queues(&self) -> Vec<String> {
        vec![self.input.clone(), self.output.clone()]
    }
}

pub struct Worker<A: ProviderAdapter> {
    config: WorkerConfig,
    processor: Arc<Processor<A>>,
    metrics: Arc<Metrics>,
    health: HealthRegistry,
}

type Processed = (DeliveryTag, Result<Vec<u8>, ProcessError>);

impl<A: ProviderAdapter> Worker<A> {
    pub fn new(
        config: WorkerConfig,
        adapter: A,
        breaker: CircuitBreaker,
        metrics: Arc<Metrics>,
        health: HealthRegistry,
    ) -> Self {
        let processor = Arc::new(Processor {
            adapter,
            breaker,
            timeout: config.adapter_timeout,
            metrics: metrics.clone(),
        });

        Self {
            config,
            processor,
            metrics,
            health,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Consume the input queue until shutdown is signalled, then finish
    /// whatever is in flight. A delivery stream that ends on its own means
    /// the broker cancelled the consumer, which is a failure.
    pub async fn run<B>(&self, broker: &B, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError>
    where
        B: Broker + ?Sized,
    {
        let mut deliveries = broker.consume(&self.config.input).await?;
        let max_in_flight = self.config.max_in_flight.max(1);

        tracing::info!(
            worker = %self.config.name,
            provider = %self.processor.adapter.provider(),
            queue = %self.config.input,
            max_in_flight = max_in_flight,
            "Worker consuming"
        );
        self.health
            .update(
                &self.config.name,
                HealthStatus::Healthy,
                Some(format!("consuming {}", self.config.input)),
            )
            .await;

        let mut in_flight: JoinSet<Processed> = JoinSet::new();
        let mut stopping = *shutdown.borrow();

        let result = loop {
            if stopping && in_flight.is_empty() {
                break Ok(());
            }
            let accepting = !stopping && in_flight.len() < max_in_flight;

            tokio::select! {
                biased;

                _ = shutdown.changed(), if !stopping => {
                    tracing::info!(
                        worker = %self.config.name,
                        in_flight = in_flight.len(),
                        "Shutdown requested, draining in-flight messages"
                    );
                    stopping = true;
                }

                Some(joined) = in_flight.join_next() => match joined {
                    Ok((tag, outcome)) => {
                        if let Err(e) = self.respond(broker, tag, outcome).await {
                            break Err(e);
                        }
                    }
                    Err(e) => {
                        // Tasks are never aborted while the loop runs
                        tracing::error!(worker = %self.config.name, error = %e, "Worker task lost");
                    }
                },

                next = deliveries.next(), if accepting => match next {
                    Some(Ok(delivery)) => self.dispatch(&mut in_flight, delivery),
                    Some(Err(e)) => break Err(e),
                    None => break Err(BrokerError::Consume {
                        queue: self.config.input.clone(),
                        reason: "consumer cancelled by broker".to_string(),
                    }),
                },
            }
        };

        match &result {
            Ok(()) => {
                tracing::info!(worker = %self.config.name, "Worker stopped");
                self.health
                    .update(&self.config.name, HealthStatus::Degraded("stopped".to_string()), None)
                    .await;
            }
            Err(e) => {
                self.metrics.record_abandoned(&self.config.name, in_flight.len());
                tracing::error!(
                    worker = %self.config.name,
                    error = %e,
                    abandoned = in_flight.len(),
                    "Worker failed, unacknowledged messages will be redelivered"
                );
                self.health
                    .update(&self.config.name, HealthStatus::Unhealthy(e.to_string()), None)
                    .await;
            }
        }

        result
    }

    fn dispatch(&self, in_flight: &mut JoinSet<Processed>, delivery: Delivery) {
        self.metrics.record_consumed(&self.config.name);

        tracing::debug!(
            worker = %self.config.name,
            delivery_tag = %delivery.tag,
            redelivered = delivery.redelivered,
            bytes = delivery.body.len(),
            "Received request"
        );

        let processor = self.processor.clone();
        let Delivery { tag, body, .. } = delivery;

        in_flight.spawn(async move {
            let outcome = AssertUnwindSafe(processor.process(&body))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ProcessError::from_panic(panic.as_ref())));
            (tag, outcome)
        });
    }

    async fn respond<B>(
        &self,
        broker: &B,
        tag: DeliveryTag,
        outcome: Result<Vec<u8>, ProcessError>,
    ) -> Result<(), BrokerError>
    where
        B: Broker + ?Sized,
    {
        let provider = self.processor.adapter.provider();

        let (body, status) = match outcome {
            Ok(payload) => {
                tracing::debug!(
                    worker = %self.config.name,
                    delivery_tag = %tag,
                    provider = %provider,
                    outcome = "success",
                    "Provider call succeeded"
                );
                (payload, "success")
            }
            Err(error) => {
                tracing::warn!(
                    worker = %self.config.name,
                    delivery_tag = %tag,
                    provider = %provider,
                    outcome = error.reason(),
                    error = %error,
                    "Request failed"
                );
                self.metrics.record_failure(provider, error.reason());
                (error.into_response().to_bytes(), "error")
            }
        };

        if let Err(e) = broker.publish(&self.config.output, &body).await {
            self.metrics.record_publish_failure(&self.config.name);
            self.metrics.record_abandoned(&self.config.name, 1);
            return Err(e);
        }
        if let Err(e) = broker.ack(tag).await {
            self.metrics.record_abandoned(&self.config.name, 1);
            return Err(e);
        }
        self.metrics.record_responded(&self.config.name, status);

        Ok(())
    }
}

/// The part of a worker that runs off the loop: shared by every task.
struct Processor<A: ProviderAdapter> {
    adapter: A,
    breaker: CircuitBreaker,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl<A: ProviderAdapter> Processor<A> {
    async fn process(&self, body: &[u8]) -> Result<Vec<u8>, ProcessError> {
        let request: A::Request = serde_json::from_slice(body).map_err(ProcessError::from_decode)?;
        self.adapter.validate(&request).map_err(ProcessError::Invalid)?;

        let provider = self.adapter.provider();
        let started = Instant::now();

        let call = async {
            match tokio::time::timeout(self.timeout, self.adapter.call(request)).await {
                Ok(result) => result.map_err(ProcessError::Adapter),
                Err(_) => Err(ProcessError::Timeout {
                    provider: provider.to_string(),
                    timeout: self.timeout,
                }),
            }
        };

        let result = match self.breaker.call(call, ProcessError::is_provider_fault).await {
            Ok(payload) => Ok(payload),
            Err(CircuitBreakerError::CircuitOpen(name)) => return Err(ProcessError::CircuitOpen(name)),
            Err(CircuitBreakerError::OperationFailed(error)) => Err(error),
        };

        self.metrics
            .record_adapter_call(provider, started.elapsed().as_secs_f64());
        self.metrics
            .update_circuit_state(provider, self.breaker.state().await);

        result
    }
}
