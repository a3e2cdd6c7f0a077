use super::broker::{Broker, BrokerError};

// ============================================================================
// Broker Topology
// ============================================================================
//
// Every component declares the queues it touches before consuming. The
// declaration is idempotent, so each process can run it on every start.
// The first failure aborts setup; a component never runs against a
// partially declared topology.
//
// ============================================================================

/// Declare `queues` as durable queues, stopping at the first failure.
pub async fn declare_topology<B, S>(broker: &B, queues: &[S]) -> Result<(), BrokerError>
where
    B: Broker + ?Sized,
    S: AsRef<str>,
{
    for queue in queues {
        broker.declare_queue(queue.as_ref()).await?;
    }

    tracing::info!(queues = queues.len(), "Broker topology declared");
    Ok(())
}

/// Queue names in first-seen order without duplicates.
pub fn unique_queues<'a, I>(queues: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = Vec::new();
    for queue in queues {
        if !seen.iter().any(|existing: &String| existing == queue) {
            seen.push(queue.to_string());
        }
    }
    seen
}
