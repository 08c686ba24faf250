//! Resource store adapters
//!
//! Implementations of [`ResourceStore`](crate::domain::ResourceStore):
//! - [`KubeStore`]: the Kubernetes API server through `kube::Api`
//! - [`InMemoryStore`]: a deterministic store with API-server-like generation
//!   semantics, fault injection and readiness simulation

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeStore;
pub use memory::InMemoryStore;
