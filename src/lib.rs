//! # subrelay
//!
//! `subrelay` subscribes to topic feeds on an upstream websocket
//! subscription service (`ws://<host>:<port>/subscribe/<topic>[/<instance>]`)
//! and rebroadcasts every frame it receives, unmodified, to every websocket
//! client connected to it. Nothing is stored and nothing is guaranteed: a
//! client only sees what arrives while it is connected.
//!
//! ## Core Modules
//!
//! - `upstream`: topics, relayed messages and the outbound `Subscription`.
//! - `multiplexer`: owns many independent subscriptions keyed by topic, with
//!   optional reconnection.
//! - `registry`: the set of connected downstream endpoints.
//! - `relay`: the `Broadcaster` fanning upstream messages out to the registry.
//! - `transport`: the downstream websocket server.
//! - `presentation`: status/content hooks for showing feed activity to a person.
//! - `config`: layered configuration loading.
//! - `utils`: error type and logging setup.

pub mod config;
pub mod multiplexer;
pub mod presentation;
pub mod registry;
pub mod relay;
pub mod transport;
pub mod upstream;
pub mod utils;

#[cfg(test)]
mod tests;
