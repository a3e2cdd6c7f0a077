use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::health::{HealthRegistry, HealthStatus};
use crate::messaging::{decode_request, Broker, BrokerError, Delivery, Response};
use crate::metrics::Metrics;

// ============================================================================
// Router
// ============================================================================
//
// Reads one discriminator field from each request and forwards the original
// body, byte for byte, to the queue registered for that value. Every input
// produces exactly one acknowledgment record on the output queue:
//
//   {"status":"success","<ack_key>":"<value>"}
//   {"status":"error","message":"<reason>"}
//
// The input is acked only after the record is published. A broker failure
// stops the router with the delivery unacked, so the broker redelivers it.
// If the forward succeeded before the failure, the redelivery forwards it
// again (at-least-once).
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct RouteTable {
    pub name: String,
    pub input: String,
    pub output: String,
    /// Discriminator field, e.g. `type` or `carrier`
    pub field: String,
    /// Key used in the success acknowledgment, e.g. `gateway`
    pub ack_key: String,
    /// Discriminator value -> destination queue
    pub routes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Forward { destination: String, value: String },
    Reject(String),
}

impl RouteTable {
    /// Routing decision for one message body. Pure: no broker involved.
    pub fn resolve(&self, body: &[u8]) -> RouteDecision {
        let Ok(request) = decode_request(body) else {
            return RouteDecision::Reject("malformed payload".to_string());
        };

        let Some(raw) = request.get(&self.field) else {
            return RouteDecision::Reject(format!("{} not specified", self.field));
        };

        let destination = raw.as_str().and_then(|value| self.routes.get(value));
        match destination {
            Some(destination) => RouteDecision::Forward {
                destination: destination.clone(),
                value: render(raw),
            },
            None => RouteDecision::Reject(format!("unknown {}: {}", self.field, render(raw))),
        }
    }

    /// Every queue this router touches: input, destinations, output.
    pub fn queues(&self) -> Vec<String> {
        let mut queues = vec![self.input.clone()];
        queues.extend(self.routes.values().cloned());
        queues.push(self.output.clone());
        queues
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub struct Router {
    table: RouteTable,
    metrics: Arc<Metrics>,
    health: HealthRegistry,
}

impl Router {
    pub fn new(table: RouteTable, metrics: Arc<Metrics>, health: HealthRegistry) -> Self {
        Self {
            table,
            metrics,
            health,
        }
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Consume the input queue until shutdown is signalled. Returns the
    /// first broker error; a delivery stream that ends on its own means the
    /// broker cancelled the consumer.
    pub async fn run<B>(&self, broker: &B, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError>
    where
        B: Broker + ?Sized,
    {
        let mut deliveries = broker.consume(&self.table.input).await?;

        tracing::info!(
            router = %self.table.name,
            queue = %self.table.input,
            field = %self.table.field,
            routes = self.table.routes.len(),
            "Router consuming"
        );
        self.health
            .update(&self.table.name, HealthStatus::Healthy, Some(format!("consuming {}", self.table.input)))
            .await;

        if *shutdown.borrow() {
            return Ok(());
        }

        let result = loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.changed() => break Ok(()),
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => break Err(e),
                    None => break Err(BrokerError::Consume {
                        queue: self.table.input.clone(),
                        reason: "consumer cancelled by broker".to_string(),
                    }),
                },
            };

            if let Err(e) = self.handle(broker, delivery).await {
                self.metrics.record_abandoned(&self.table.name, 1);
                break Err(e);
            }
        };

        match &result {
            Ok(()) => {
                tracing::info!(router = %self.table.name, "Router stopped");
                self.health
                    .update(&self.table.name, HealthStatus::Degraded("stopped".to_string()), None)
                    .await;
            }
            Err(e) => {
                tracing::error!(router = %self.table.name, error = %e, "Router failed");
                self.health
                    .update(&self.table.name, HealthStatus::Unhealthy(e.to_string()), None)
                    .await;
            }
        }

        result
    }

    async fn handle<B>(&self, broker: &B, delivery: Delivery) -> Result<(), BrokerError>
    where
        B: Broker + ?Sized,
    {
        let name = self.table.name.as_str();
        self.metrics.record_consumed(name);

        let response = match self.table.resolve(&delivery.body) {
            RouteDecision::Forward { destination, value } => {
                self.publish(broker, &destination, &delivery.body).await?;
                self.metrics.record_routed(name, &destination);

                tracing::debug!(
                    router = %name,
                    delivery_tag = %delivery.tag,
                    destination = %destination,
                    redelivered = delivery.redelivered,
                    "Forwarded request"
                );
                Response::success(self.table.ack_key.clone(), value)
            }
            RouteDecision::Reject(reason) => {
                tracing::warn!(
                    router = %name,
                    delivery_tag = %delivery.tag,
                    reason = %reason,
                    "Rejected request"
                );
                Response::error(reason)
            }
        };

        self.publish(broker, &self.table.output, &response.to_bytes()).await?;
        broker.ack(delivery.tag).await?;
        self.metrics.record_responded(name, response.status());

        Ok(())
    }

    async fn publish<B>(&self, broker: &B, queue: &str, body: &[u8]) -> Result<(), BrokerError>
    where
        B: Broker + ?Sized,
    {
        broker.publish(queue, body).await.inspect_err(|_| {
            self.metrics.record_publish_failure(&self.table.name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::topology::declare_topology;
    use crate::messaging::InMemoryBroker;

    fn payments_table() -> RouteTable {
        RouteTable {
            name: "payments".to_string(),
            input: "routerQueue".to_string(),
            output: "routerResponseQueue".to_string(),
            field: "type".to_string(),
            ack_key: "gateway".to_string(),
            routes: BTreeMap::from([
                ("paypal".to_string(), "paypalQueue".to_string()),
                ("stripe".to_string(), "stripeQueue".to_string()),
            ]),
        }
    }

    fn shipping_table() -> RouteTable {
        RouteTable {
            name: "shipping".to_string(),
            input: "shippingRouterQueue".to_string(),
            output: "shippingRouterResponseQueue".to_string(),
            field: "carrier".to_string(),
            ack_key: "carrier".to_string(),
            routes: BTreeMap::from([
                ("ups".to_string(), "upsShippingQueue".to_string()),
                ("fedex".to_string(), "fedexShippingQueue".to_string()),
                ("dhl".to_string(), "dhlShippingQueue".to_string()),
            ]),
        }
    }

    async fn setup(table: RouteTable) -> (Router, InMemoryBroker) {
        let broker = InMemoryBroker::new();
        declare_topology(&broker, &table.queues()).await.unwrap();
        let router = Router::new(table, Arc::new(Metrics::new().unwrap()), HealthRegistry::new());
        (router, broker)
    }

    /// Run until the input queue is empty and fully acknowledged, or the
    /// router fails.
    async fn run_to_completion(router: &Router, broker: &InMemoryBroker) -> Result<(), BrokerError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let idle = async {
            broker.wait_idle(&router.table().input).await;
            let _ = shutdown_tx.send(true);
            std::future::pending::<()>().await
        };

        tokio::select! {
            result = router.run(broker, shutdown_rx) => result,
            _ = idle => unreachable!(),
        }
    }

    fn in_flight(router: &Router) -> i64 {
        router
            .metrics
            .messages_in_flight
            .with_label_values(&[router.name()])
            .get()
    }

    fn parse_single(bodies: &[Vec<u8>]) -> Response {
        assert_eq!(bodies.len(), 1, "expected exactly one response");
        Response::parse(&bodies[0]).unwrap()
    }

    #[test]
    fn test_resolve_decisions() {
        let table = payments_table();

        assert_eq!(
            table.resolve(br#"{"type":"stripe","amount":5}"#),
            RouteDecision::Forward {
                destination: "stripeQueue".to_string(),
                value: "stripe".to_string(),
            }
        );
        assert_eq!(
            table.resolve(b"{oops"),
            RouteDecision::Reject("malformed payload".to_string())
        );
        assert_eq!(
            table.resolve(b"[\"paypal\"]"),
            RouteDecision::Reject("malformed payload".to_string())
        );
        assert_eq!(
            table.resolve(br#"{"amount":10}"#),
            RouteDecision::Reject("type not specified".to_string())
        );
        assert_eq!(
            table.resolve(br#"{"type":42}"#),
            RouteDecision::Reject("unknown type: 42".to_string())
        );
        assert_eq!(
            table.resolve(br#"{"type":"PayPal"}"#),
            RouteDecision::Reject("unknown type: PayPal".to_string())
        );
    }

    #[tokio::test]
    async fn test_forwards_paypal_unmodified() {
        let (router, broker) = setup(payments_table()).await;
        let body = br#"{"type":"paypal","amount":10}"#;
        broker.publish("routerQueue", body).await.unwrap();

        run_to_completion(&router, &broker).await.unwrap();

        assert_eq!(broker.published("paypalQueue").await, vec![body.to_vec()]);
        assert!(broker.published("stripeQueue").await.is_empty());
        assert_eq!(
            parse_single(&broker.published("routerResponseQueue").await),
            Response::success("gateway", "paypal")
        );
        assert_eq!(broker.acknowledged().await.len(), 1);
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_carrier_is_rejected() {
        let (router, broker) = setup(shipping_table()).await;
        broker
            .publish("shippingRouterQueue", br#"{"carrier":"unknown"}"#)
            .await
            .unwrap();

        run_to_completion(&router, &broker).await.unwrap();

        assert_eq!(
            parse_single(&broker.published("shippingRouterResponseQueue").await),
            Response::error("unknown carrier: unknown")
        );
        for queue in ["upsShippingQueue", "fedexShippingQueue", "dhlShippingQueue"] {
            assert!(broker.published(queue).await.is_empty(), "{queue} received a message");
        }
        assert_eq!(broker.acknowledged().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_field_and_malformed_body() {
        let (router, broker) = setup(shipping_table()).await;
        broker
            .publish("shippingRouterQueue", br#"{"weight":2}"#)
            .await
            .unwrap();
        broker.publish("shippingRouterQueue", b"not json").await.unwrap();

        run_to_completion(&router, &broker).await.unwrap();

        let responses: Vec<Response> = broker
            .published("shippingRouterResponseQueue")
            .await
            .iter()
            .map(|body| Response::parse(body).unwrap())
            .collect();
        assert_eq!(
            responses,
            vec![
                Response::error("carrier not specified"),
                Response::error("malformed payload"),
            ]
        );
        for queue in ["upsShippingQueue", "fedexShippingQueue", "dhlShippingQueue"] {
            assert!(broker.published(queue).await.is_empty(), "{queue} received a message");
        }
        assert_eq!(broker.acknowledged().await.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_message_for_redelivery() {
        let (router, broker) = setup(payments_table()).await;
        broker.fail_publishes_to("routerResponseQueue").await;
        broker
            .publish("routerQueue", br#"{"type":"stripe"}"#)
            .await
            .unwrap();

        let result = run_to_completion(&router, &broker).await;

        assert!(matches!(result, Err(BrokerError::Publish { .. })));
        assert!(broker.acknowledged().await.is_empty());
        assert_eq!(broker.unacked_count().await, 1);
        assert_eq!(in_flight(&router), 0);

        broker.requeue_unacked().await;
        assert_eq!(broker.depth("routerQueue").await, 1);
    }

    #[tokio::test]
    async fn test_redelivered_message_is_forwarded_again() {
        let (router, broker) = setup(payments_table()).await;
        let body = br#"{"type":"paypal","amount":1}"#;
        broker.publish("routerQueue", body).await.unwrap();
        broker.fail_publishes_to("routerResponseQueue").await;
        assert!(run_to_completion(&router, &broker).await.is_err());

        broker.requeue_unacked().await;
        broker.restore_publishes_to("routerResponseQueue").await;
        run_to_completion(&router, &broker).await.unwrap();

        // Forwarded once per delivery attempt
        assert_eq!(broker.published("paypalQueue").await.len(), 2);
        assert_eq!(
            parse_single(&broker.published("routerResponseQueue").await),
            Response::success("gateway", "paypal")
        );
        assert_eq!(broker.acknowledged().await.len(), 1);
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_router() {
        let (router, broker) = setup(payments_table()).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            shutdown_tx.send(true).unwrap();
        });

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(2), router.run(&broker, shutdown_rx)).await;
        stopper.await.unwrap();

        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_cancelled_consumer_fails_router() {
        let (router, broker) = setup(payments_table()).await;
        broker.cancel_consumers().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = router.run(&broker, shutdown_rx).await;

        match result {
            Err(BrokerError::Consume { queue, .. }) => assert_eq!(queue, "routerQueue"),
            other => panic!("expected consume failure, got {other:?}"),
        }
    }
}
