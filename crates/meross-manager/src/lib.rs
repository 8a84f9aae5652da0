//! Device registry, transport arbiter, subscription engine and
//! top-level orchestrator for the Meross cloud device manager.

pub mod arbiter;
pub mod correlation;
pub mod device;
pub mod error_budget;
pub mod events;
pub mod http_client;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod subscription;

pub use arbiter::{ArbiterError, TransportArbiter, TransportMode};
pub use correlation::CorrelationRegistry;
pub use device::DeviceCore;
pub use error_budget::ErrorBudget;
pub use events::ManagerEvent;
pub use http_client::mock::MockApiClient;
pub use http_client::{Credentials, HttpApiClient};
pub use manager::{ManagerOptions, MerossManager};
pub use queue::RequestQueue;
pub use registry::{DeviceFilter, DeviceRegistry};
pub use stats::CallStats;
pub use subscription::{SubscriptionConfig, SubscriptionEngine};
