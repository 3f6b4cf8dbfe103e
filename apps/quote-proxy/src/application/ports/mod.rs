//! Application Ports (Driven)
//!
//! Interfaces the proxy core uses to reach the outside world. Each one has
//! an infrastructure adapter; tests substitute fakes or `mockall` mocks.
//!
//! - `ConfigProviderPort`: resolves `(api, endpoint)` to a descriptor
//! - `TransportPort`: performs the outbound HTTP request
//! - `HistoryStorePort`: optional durable sink for history points
//! - `Clock`: wall-clock source for fire times and point timestamps

mod clock_port;
mod config_provider_port;
mod history_store_port;
mod transport_port;

pub use clock_port::{Clock, SystemClock};
pub use config_provider_port::ConfigProviderPort;
pub use history_store_port::{HistoryStorePort, NoOpHistoryStore, PersistenceError};
pub use transport_port::{OutboundRequest, TransportError, TransportPort, TransportResponse};

#[cfg(test)]
pub use config_provider_port::MockConfigProviderPort;
#[cfg(test)]
pub use history_store_port::MockHistoryStorePort;
#[cfg(test)]
pub use transport_port::MockTransportPort;
