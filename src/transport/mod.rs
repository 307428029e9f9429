//! The `transport` module is the downstream side of the relay: a websocket
//! server whose clients receive every relayed frame.
//!
//! Each accepted connection becomes an `Endpoint` in the shared `Registry`
//! for as long as it stays open. Clients do not speak a protocol; anything
//! they send is logged and ignored.

pub mod websocket;

pub use websocket::{Acceptor, bind, serve, start_downstream_server};
