//! Config Provider Port (Driven Port)
//!
//! Read-only view of the upstream API registry.

use crate::domain::endpoint::EndpointDescriptor;

/// Port for resolving upstream endpoints.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigProviderPort: Send + Sync {
    /// Resolve `api`/`endpoint` to a descriptor, or `None` when unknown.
    fn resolve(&self, api: &str, endpoint: &str) -> Option<EndpointDescriptor>;

    /// Whether `api` is configured.
    fn has_api(&self, api: &str) -> bool;

    /// Whether `api` declares `endpoint`.
    fn has_endpoint(&self, api: &str, endpoint: &str) -> bool;
}
