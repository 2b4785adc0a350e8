//! JSON-RPC dispatch core of the sequencer.
//!
//! Services are registered once into a [`registry::ServiceRegistry`], frozen, and served by an
//! [`server::RpcServer`] over any [`codec::ServerCodec`]. The [`http`] and [`tcp`] modules adapt
//! it to network transports.

pub mod api;
pub mod codec;
pub mod errors;
pub mod http;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod tcp;
pub mod types;
pub mod utils;
