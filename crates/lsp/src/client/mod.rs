//! Client handle over a started analysis server.
//!
//! [`start_client`] starts a server on a [`Transport`](crate::Transport),
//! runs the initialize handshake, computes the typed [`CapabilitySet`]
//! once, and hands back a cheaply cloneable [`ClientHandle`]. The handle
//! is transport-agnostic; it neither knows nor cares whether the server
//! is a subprocess or an embedded module.

mod capabilities;
mod handle;
mod lifecycle;
mod state;


pub use capabilities::{CapabilitySet, Handshake, TestCapabilities, client_capabilities};
pub use handle::ClientHandle;
pub use lifecycle::{ClientConfig, start_client};
pub use state::ConnectionState;
