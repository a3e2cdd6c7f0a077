//! Queue-driven request relay for payment gateways and shipping carriers.
//!
//! Routers read a discriminator from each request and forward it to the
//! queue of the matching provider. Workers consume a provider queue, call the
//! provider's HTTP API once per request, and publish the answer (or an error
//! envelope) to a response queue. All traffic goes through an AMQP broker
//! with manual acknowledgment, so delivery is at-least-once.

pub mod config;
pub mod dispatch;
pub mod health;
pub mod messaging;
pub mod metrics;
pub mod providers;
pub mod supervisor;
pub mod utils;
