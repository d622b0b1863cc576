//! Remote invocation layer.
//!
//! - `transport`: TCP and local-socket channels framed with the wire codec.
//! - `discovery`: locating the server behind an endpoint.
//! - `client`: controller-side connection, deployment and invocation.
//! - `capability`: typed argument marshalling and capability stubs.
//! - `dispatch`: child-side service registry and dispatch table.
//! - `server`: child-side invocation server.

pub mod capability;
pub mod client;
pub mod discovery;
pub mod dispatch;
pub mod server;
pub mod transport;

pub use capability::{Arguments, CapabilityStub, RemoteCapability, WireType};
pub use client::{RemoteInvocationClient, ServerHandle};
pub use discovery::{Discovery, EndpointDiscovery};
pub use dispatch::{DispatchTable, ServiceRegistry};
pub use server::RemoteInvocationServer;
pub use transport::{Channel, Listener};
