//! Cluster-facing networking: service discovery against an external
//! catalog ([`discovery`]) and client-side load balancing with circuit
//! breaking ([`loadbalancer`]). Health probing lives at
//! [`crate::health`]; it is consumed by both this module's failure
//! detection and [`crate::clustering::failover`].

pub mod discovery;
pub mod loadbalancer;

pub use discovery::{ClusterCatalog, DiscoveryConfig, InProcessCatalog, NodeEvent, Registry};
pub use loadbalancer::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use loadbalancer::{LoadBalancer, LoadBalancingPolicy, NodeStats, RequestFingerprint};
