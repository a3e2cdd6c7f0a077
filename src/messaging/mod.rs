// ============================================================================
// Messaging Module
// ============================================================================
//
// Broker plumbing shared by routers and workers:
// - broker/     - `Broker` trait, deliveries and tags
// - rabbitmq/   - AMQP implementation (lapin)
// - in_memory/  - in-process broker used by tests
// - topology/   - idempotent queue declaration
// - envelope/   - request/response payloads
//
// ============================================================================

mod broker;
pub mod envelope;
mod in_memory;
mod rabbitmq;
pub mod topology;

pub use broker::{Broker, BrokerError, Delivery, DeliveryStream, DeliveryTag};
pub use envelope::{decode_request, RequestFields, Response};
pub use in_memory::InMemoryBroker;
pub use rabbitmq::RabbitMqBroker;
pub use topology::declare_topology;
