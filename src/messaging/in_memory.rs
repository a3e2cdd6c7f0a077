//! In-memory broker for tests and local wiring.
//!
//! Behaves like a single AMQP connection: durable queues, monotonically
//! increasing delivery tags, manual acknowledgment, and redelivery of
//! unacknowledged messages when the connection is dropped.

use async_trait::async_trait;
use futures_util::stream;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use super::broker::{Broker, BrokerError, Delivery, DeliveryStream, DeliveryTag};

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Pending>>,
    unacked: BTreeMap<DeliveryTag, Unacked>,
    acked: Vec<DeliveryTag>,
    published: HashMap<String, Vec<Vec<u8>>>,
    failing_queues: HashSet<String>,
    declarations: usize,
    next_tag: u64,
    cancelled: bool,
}

struct Pending {
    body: Vec<u8>,
    redelivered: bool,
}

struct Unacked {
    queue: String,
    body: Vec<u8>,
}

/// Shared in-memory broker. Clones observe the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish to `queue` fail.
    pub async fn fail_publishes_to(&self, queue: &str) {
        self.state.lock().await.failing_queues.insert(queue.to_string());
    }

    pub async fn restore_publishes_to(&self, queue: &str) {
        self.state.lock().await.failing_queues.remove(queue);
    }

    /// Simulate the broker cancelling every consumer: open delivery
    /// streams end without handing out further messages.
    pub async fn cancel_consumers(&self) {
        self.state.lock().await.cancelled = true;
        self.notify.notify_waiters();
    }

    /// Wait until `queue` is empty and every delivery has been acknowledged.
    pub async fn wait_idle(&self, queue: &str) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock().await;
                let empty = state.queues.get(queue).map_or(true, VecDeque::is_empty);
                if empty && state.unacked.is_empty() {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Simulate a dropped connection: unacknowledged messages go back to
    /// the head of their queue, flagged as redelivered, oldest first.
    pub async fn requeue_unacked(&self) {
        let mut state = self.state.lock().await;
        let unacked = std::mem::take(&mut state.unacked);
        for (_, message) in unacked.into_iter().rev() {
            state
                .queues
                .entry(message.queue)
                .or_default()
                .push_front(Pending {
                    body: message.body,
                    redelivered: true,
                });
        }
        state.cancelled = false;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Every body published to `queue`, in publish order.
    pub async fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state.published.get(queue).cloned().unwrap_or_default()
    }

    /// Messages currently waiting in `queue` (not yet delivered).
    pub async fn depth(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }

    pub async fn acknowledged(&self) -> Vec<DeliveryTag> {
        self.state.lock().await.acked.clone()
    }

    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn declaration_count(&self) -> usize {
        self.state.lock().await.declarations
    }

    async fn next_delivery(&self, queue: &str) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.cancelled {
                    return None;
                }
                let pending = state.queues.get_mut(queue).and_then(VecDeque::pop_front);
                if let Some(pending) = pending {
                    state.next_tag += 1;
                    let tag = DeliveryTag(state.next_tag);
                    state.unacked.insert(
                        tag,
                        Unacked {
                            queue: queue.to_string(),
                            body: pending.body.clone(),
                        },
                    );
                    return Some(Delivery {
                        tag,
                        body: pending.body,
                        redelivered: pending.redelivered,
                    });
                }
            }

            notified.await;
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.declarations += 1;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        if !self.state.lock().await.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }

        let broker = self.clone();
        let queue = queue.to_string();
        let deliveries = stream::unfold((broker, queue), |(broker, queue)| async move {
            let delivery = broker.next_delivery(&queue).await?;
            Some((Ok(delivery), (broker, queue)))
        });

        Ok(Box::pin(deliveries))
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;

        if state.failing_queues.contains(queue) {
            return Err(BrokerError::Publish {
                queue: queue.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let Some(pending) = state.queues.get_mut(queue) else {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        };
        pending.push_back(Pending {
            body: body.to_vec(),
            redelivered: false,
        });
        state
            .published
            .entry(queue.to_string())
            .or_default()
            .push(body.to_vec());
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if state.unacked.remove(&tag).is_none() {
            return Err(BrokerError::Ack {
                tag,
                reason: "unknown delivery tag".to_string(),
            });
        }
        state.acked.push(tag);
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
