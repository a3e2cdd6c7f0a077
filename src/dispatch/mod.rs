// ============================================================================
// Dispatch Module
// ============================================================================
//
// The two kinds of queue consumers:
// - router/  - forwards raw requests by discriminator value
// - worker/  - calls one provider per request and publishes the result
//
// plus the seams they share:
// - adapter/ - `ProviderAdapter` trait and `AdapterError`
// - error/   - per-message failure taxonomy
//
// ============================================================================

pub mod adapter;
pub mod error;
pub mod router;
pub mod worker;

pub use adapter::{AdapterError, ProviderAdapter};
pub use error::ProcessError;
pub use router::{RouteDecision, RouteTable, Router};
pub use worker::{Worker, WorkerConfig};
