//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Environment settings and the upstream API registry.
pub mod config;

/// Inbound HTTP routes and server.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Write-behind history stores.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Outbound HTTP transport.
pub mod transport;
