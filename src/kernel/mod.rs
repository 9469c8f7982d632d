//! The kernel holds cross-cutting infrastructure shared by every worker:
//! the cooperative-service runtime, the per-process notification hub, and
//! the cache layer backing the rules pipeline's read-through lookups.

pub mod cache;
pub mod notifier;
pub mod service_host;

pub use cache::Cache;
pub use notifier::Notifier;
pub use service_host::{Service, ServiceHost};
