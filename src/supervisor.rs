use anyhow::Context;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::{RouterSettings, Settings, WorkerSettings};
use crate::dispatch::{ProviderAdapter, Router, Worker};
use crate::health::{HealthRegistry, HealthStatus};
use crate::messaging::{declare_topology, Broker, BrokerError, InMemoryBroker, RabbitMqBroker};
use crate::metrics::Metrics;
use crate::providers::{
    http, DhlAdapter, FedexAdapter, PaypalAdapter, ProviderKind, StripeAdapter, UpsAdapter,
};
use crate::utils::{CircuitBreaker, RetryConfig};

// ============================================================================
// Supervisor - Runs the configured routers and workers
// ============================================================================
//
// Responsibilities:
// - Opens one broker connection per component
// - Declares each component's queues before it consumes
// - Starts every component as its own task
// - Broadcasts shutdown and waits for in-flight messages to finish
// - Stops everything when one component fails, and reports the failure
//
//   Supervisor
//   ├── payments-router   (routerQueue)
//   ├── shipping-router   (shippingRouterQueue)
//   ├── paypal-worker     (paymentQueue)
//   └── ...
//
// ============================================================================

/// Opens the broker connection a component runs on.
#[async_trait]
pub trait Connector: Send + Sync {
    type Broker: Broker + 'static;

    async fn connect(&self, component: &str) -> Result<Self::Broker, BrokerError>;
}

pub struct RabbitMqConnector {
    url: String,
    prefetch: u16,
    retry: RetryConfig,
}

impl RabbitMqConnector {
    pub fn new(url: impl Into<String>, prefetch: u16, retry: RetryConfig) -> Self {
        Self {
            url: url.into(),
            prefetch,
            retry,
        }
    }
}

#[async_trait]
impl Connector for RabbitMqConnector {
    type Broker = RabbitMqBroker;

    async fn connect(&self, component: &str) -> Result<RabbitMqBroker, BrokerError> {
        tracing::info!(component = %component, "Connecting to broker");
        RabbitMqBroker::connect_with_retry(&self.url, self.prefetch, self.retry.clone()).await
    }
}

/// Every component shares the same in-memory broker.
#[async_trait]
impl Connector for InMemoryBroker {
    type Broker = InMemoryBroker;

    async fn connect(&self, _component: &str) -> Result<InMemoryBroker, BrokerError> {
        Ok(self.clone())
    }
}

pub struct Supervisor<C: Connector> {
    settings: Settings,
    connector: Arc<C>,
    metrics: Arc<Metrics>,
    health: HealthRegistry,
}

type ComponentResult = (String, Result<(), BrokerError>);

impl<C: Connector + 'static> Supervisor<C> {
    pub fn new(settings: Settings, connector: C, metrics: Arc<Metrics>, health: HealthRegistry) -> Self {
        Self {
            settings,
            connector: Arc::new(connector),
            metrics,
            health,
        }
    }

    /// Routers and workers to start. An empty filter selects everything.
    pub fn select(&self, only: &[String]) -> anyhow::Result<(Vec<RouterSettings>, Vec<WorkerSettings>)> {
        let known = self.settings.component_names();
        if let Some(unknown) = only.iter().find(|name| !known.contains(&name.as_str())) {
            anyhow::bail!("unknown component {unknown}; configured: {}", known.join(", "));
        }

        let wanted = |name: &str| only.is_empty() || only.iter().any(|o| o == name);
        let routers = self
            .settings
            .routers
            .iter()
            .filter(|router| wanted(&router.name))
            .cloned()
            .collect();
        let workers = self
            .settings
            .workers
            .iter()
            .filter(|worker| wanted(&worker.name))
            .cloned()
            .collect();

        Ok((routers, workers))
    }

    /// Run the selected components until `shutdown_signal` resolves or one
    /// of them fails. A failure stops the rest and is returned.
    pub async fn run<F>(&self, only: &[String], shutdown_signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (routers, workers) = self.select(only)?;
        if routers.is_empty() && workers.is_empty() {
            anyhow::bail!("no components configured");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut components: JoinSet<ComponentResult> = JoinSet::new();

        let started = self
            .start_all(&routers, &workers, &shutdown_rx, &mut components)
            .await;
        if let Err(e) = started {
            let _ = shutdown_tx.send(true);
            while components.join_next().await.is_some() {}
            return Err(e);
        }

        tracing::info!(
            routers = routers.len(),
            workers = workers.len(),
            "✅ All components started"
        );

        tokio::pin!(shutdown_signal);
        let mut failure: Option<anyhow::Error> = None;
        let mut signalled = false;

        loop {
            tokio::select! {
                _ = &mut shutdown_signal, if !signalled => {
                    tracing::info!("🛑 Shutdown requested, draining components");
                    signalled = true;
                    let _ = shutdown_tx.send(true);
                }
                joined = components.join_next() => match joined {
                    None => break,
                    Some(Ok((name, Ok(())))) => {
                        tracing::info!(component = %name, "Component stopped");
                    }
                    Some(Ok((name, Err(e)))) => {
                        tracing::error!(component = %name, error = %e, "Component failed, stopping all components");
                        if failure.is_none() {
                            failure = Some(anyhow::Error::new(e).context(format!("{name} failed")));
                        }
                        signalled = true;
                        let _ = shutdown_tx.send(true);
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Component task aborted");
                        if failure.is_none() {
                            failure = Some(anyhow::anyhow!("component task aborted: {e}"));
                        }
                        signalled = true;
                        let _ = shutdown_tx.send(true);
                    }
                },
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                tracing::info!("🛑 All components stopped");
                Ok(())
            }
        }
    }

    async fn start_all(
        &self,
        routers: &[RouterSettings],
        workers: &[WorkerSettings],
        shutdown: &watch::Receiver<bool>,
        components: &mut JoinSet<ComponentResult>,
    ) -> anyhow::Result<()> {
        for settings in routers {
            let router = Router::new(settings.route_table(), self.metrics.clone(), self.health.clone());
            let broker = self.prepare(&router.table().name, &router.table().queues()).await?;
            let shutdown = shutdown.clone();

            components.spawn(async move {
                let result = router.run(&broker, shutdown).await;
                close(&broker, router.name()).await;
                (router.name().to_string(), result)
            });
        }

        if workers.is_empty() {
            return Ok(());
        }

        let client = http::build_client().context("failed to build HTTP client")?;
        let providers = &self.settings.providers;

        for settings in workers {
            match settings.provider {
                ProviderKind::Paypal => {
                    let adapter = PaypalAdapter::new(client.clone(), &providers.paypal_url);
                    self.start_worker(settings, adapter, shutdown, components).await?
                }
                ProviderKind::Stripe => {
                    let adapter = StripeAdapter::new(
                        client.clone(),
                        &providers.stripe_url,
                        &providers.stripe_success_url,
                        &providers.stripe_cancel_url,
                    );
                    self.start_worker(settings, adapter, shutdown, components).await?
                }
                ProviderKind::Ups => {
                    let adapter = UpsAdapter::new(client.clone(), &providers.ups_url);
                    self.start_worker(settings, adapter, shutdown, components).await?
                }
                ProviderKind::Fedex => {
                    let adapter = FedexAdapter::new(client.clone(), &providers.fedex_url);
                    self.start_worker(settings, adapter, shutdown, components).await?
                }
                ProviderKind::Dhl => {
                    let adapter = DhlAdapter::new(client.clone(), &providers.dhl_url);
                    self.start_worker(settings, adapter, shutdown, components).await?
                }
            }
        }

        Ok(())
    }

    async fn start_worker<A: ProviderAdapter>(
        &self,
        settings: &WorkerSettings,
        adapter: A,
        shutdown: &watch::Receiver<bool>,
        components: &mut JoinSet<ComponentResult>,
    ) -> anyhow::Result<()> {
        let config = settings.worker_config(&self.settings.worker);
        let breaker = CircuitBreaker::new(
            settings.provider.as_str(),
            self.settings.circuit_breaker.breaker_config(),
        );
        let broker = self.prepare(&config.name, &config.queues()).await?;

        let worker = Worker::new(config, adapter, breaker, self.metrics.clone(), self.health.clone());
        let shutdown = shutdown.clone();

        components.spawn(async move {
            let result = worker.run(&broker, shutdown).await;
            close(&broker, worker.name()).await;
            (worker.name().to_string(), result)
        });

        Ok(())
    }

    /// Connect and declare, both fatal for the component.
    async fn prepare(&self, component: &str, queues: &[String]) -> anyhow::Result<C::Broker> {
        self.health
            .update(component, HealthStatus::Degraded("starting".to_string()), None)
            .await;

        let broker = self
            .connector
            .connect(component)
            .await
            .with_context(|| format!("{component}: broker connection failed"))?;

        declare_topology(&broker, queues)
            .await
            .with_context(|| format!("{component}: queue declaration failed"))?;

        Ok(broker)
    }
}

async fn close<B: Broker + ?Sized>(broker: &B, component: &str) {
    if let Err(e) = broker.close().await {
        tracing::warn!(component = %component, error = %e, "Failed to close broker connection");
    }
}

/// Declare every configured queue on one connection and return.
pub async fn declare_all<C: Connector>(settings: &Settings, connector: &C) -> anyhow::Result<usize> {
    let queues = settings.all_queues();
    let broker = connector.connect("topology").await.context("broker connection failed")?;

    let declared = declare_topology(&broker, &queues).await;
    close(&broker, "topology").await;
    declared.context("queue declaration failed")?;

    Ok(queues.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Response;
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Payments router feeding a Stripe worker that cannot reach Stripe.
    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.routers = vec![RouterSettings {
            name: "payments-router".to_string(),
            input: "routerQueue".to_string(),
            output: "routerResponseQueue".to_string(),
            field: "type".to_string(),
            ack_key: "gateway".to_string(),
            routes: BTreeMap::from([("stripe".to_string(), "stripeQueue".to_string())]),
        }];
        settings.workers = vec![WorkerSettings {
            name: "stripe-worker".to_string(),
            provider: ProviderKind::Stripe,
            input: "stripeQueue".to_string(),
            output: "stripeResponseQueue".to_string(),
            adapter_timeout_secs: Some(5),
            max_in_flight: None,
        }];
        settings.providers.stripe_url = "http://127.0.0.1:1".to_string();
        settings
    }

    fn supervisor(settings: Settings, broker: &InMemoryBroker) -> Supervisor<InMemoryBroker> {
        Supervisor::new(
            settings,
            broker.clone(),
            Arc::new(Metrics::new().unwrap()),
            HealthRegistry::new(),
        )
    }

    async fn wait_for(broker: &InMemoryBroker, queue: &str) {
        while broker.published(queue).await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_request_flows_through_router_and_worker() {
        let broker = InMemoryBroker::new();
        let settings = settings();
        declare_all(&settings, &broker).await.unwrap();
        broker
            .publish(
                "routerQueue",
                br#"{"type":"stripe","secret_key":"sk_test","amount":5,"currency":"usd"}"#,
            )
            .await
            .unwrap();

        let supervisor = supervisor(settings, &broker);
        let watcher = broker.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            supervisor.run(&[], async move { wait_for(&watcher, "stripeResponseQueue").await }),
        )
        .await
        .unwrap();
        assert!(result.is_ok());

        let ack = Response::parse(&broker.published("routerResponseQueue").await[0]).unwrap();
        assert_eq!(ack, Response::success("gateway", "stripe"));

        let answer = Response::parse(&broker.published("stripeResponseQueue").await[0]).unwrap();
        match answer {
            Response::Error { message } => assert!(message.starts_with("stripe request failed")),
            other => panic!("expected error envelope, got {other:?}"),
        }
        assert_eq!(broker.unacked_count().await, 0);
        assert_eq!(broker.acknowledged().await.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_timeout_outlasts_global_default() {
        let (stripe_url, server) =
            crate::providers::stub::serve_after(Duration::from_millis(1500), vec![(200, r#"{"id":"cs_1"}"#)])
                .await;
        let broker = InMemoryBroker::new();
        let mut settings = settings();
        settings.worker.adapter_timeout_secs = 1;
        settings.workers[0].adapter_timeout_secs = Some(5);
        settings.providers.stripe_url = stripe_url;
        declare_all(&settings, &broker).await.unwrap();
        broker
            .publish(
                "routerQueue",
                br#"{"type":"stripe","secret_key":"sk_test","amount":5,"currency":"usd"}"#,
            )
            .await
            .unwrap();

        let supervisor = supervisor(settings, &broker);
        let watcher = broker.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            supervisor.run(&[], async move { wait_for(&watcher, "stripeResponseQueue").await }),
        )
        .await
        .unwrap();
        assert!(result.is_ok());

        assert_eq!(
            broker.published("stripeResponseQueue").await,
            vec![br#"{"id":"cs_1"}"#.to_vec()]
        );
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_component_failure_stops_supervisor() {
        let broker = InMemoryBroker::new();
        let settings = settings();
        declare_all(&settings, &broker).await.unwrap();
        broker.fail_publishes_to("routerResponseQueue").await;
        broker
            .publish("routerQueue", br#"{"type":"paypal"}"#)
            .await
            .unwrap();

        let supervisor = supervisor(settings, &broker);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.run(&[], std::future::pending()),
        )
        .await
        .unwrap();

        let error = result.unwrap_err();
        assert!(error.to_string().contains("payments-router failed"));
        assert_eq!(broker.unacked_count().await, 1);
    }

    #[tokio::test]
    async fn test_select_filters_components() {
        let broker = InMemoryBroker::new();
        let supervisor = supervisor(Settings::default(), &broker);

        let (routers, workers) = supervisor.select(&["ups-worker".to_string()]).unwrap();
        assert!(routers.is_empty());
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].provider, ProviderKind::Ups);

        let (routers, workers) = supervisor.select(&[]).unwrap();
        assert_eq!((routers.len(), workers.len()), (2, 5));

        let error = supervisor.select(&["usps-worker".to_string()]).unwrap_err();
        assert!(error.to_string().starts_with("unknown component usps-worker"));
    }

    #[tokio::test]
    async fn test_declare_all_default_topology() {
        let broker = InMemoryBroker::new();
        let declared = declare_all(&Settings::default(), &broker).await.unwrap();

        assert_eq!(declared, 16);
        assert_eq!(broker.queue_names().await.len(), 16);
    }
}
