//! Backend module.

mod aggregator;
mod proxy;

pub use aggregator::{
    AggregateEndpoint, AggregateResponse, Aggregator, Origin, SubRequest, SubRequestBody,
};
pub use proxy::{ForwardingProxy, ProxyEndpoint};

use tollgate_kernel::gateway::{RouteMatch, ServiceDiscovery};

/// Let service discovery override the route's static target, if it knows
/// the backend.
pub(crate) async fn apply_discovery(discovery: Option<&dyn ServiceDiscovery>, route: &mut RouteMatch) {
    if let Some(discovery) = discovery {
        if let Some(target) = discovery.resolve(&route.backend).await {
            route.target = target;
        }
    }
}
