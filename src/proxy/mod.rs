pub mod client;
pub mod envelope;
pub mod gateway;
pub mod planner;
pub mod retry;
pub mod router;
pub mod selector;

pub use client::ProxyClient;
pub use envelope::{Endpoint, EndpointKind};
pub use gateway::Gateway;
pub use retry::{classify_status, AttemptClass, DispatchOutcome, Orchestrator, RetryPolicy};
pub use router::ModelResolver;
pub use selector::{Candidate, ChannelSelector};
