//! Application Ports (Driver and Driven)
//!
//! Ports define interfaces for interacting with external systems.
//! - **Driver Ports** (Primary/Inbound): How the world uses our application
//! - **Driven Ports** (Secondary/Outbound): How our application uses external systems

mod auth_port;
mod group_authorizer_port;
mod location_store_port;

pub use auth_port::{AuthError, StreamKeyAuthenticatorPort, TokenAuthenticatorPort};
pub use group_authorizer_port::{AuthorizerError, GroupAuthorizerPort, GroupTarget};
pub use location_store_port::{LocationStoreError, LocationStorePort, RecordReceipt};

#[cfg(test)]
pub use auth_port::{MockStreamKeyAuthenticatorPort, MockTokenAuthenticatorPort};
#[cfg(test)]
pub use group_authorizer_port::MockGroupAuthorizerPort;
#[cfg(test)]
pub use location_store_port::MockLocationStorePort;
