//! Message delivery between peers
//!
//! The consensus logic only ever sees the two traits defined here. `socket` carries frames
//! over Unix-domain or TCP sockets; `memory` is an in-process network with fault injection
//! used for testing.

use crate::messages::{Reply, Request};

pub mod memory;
pub mod socket;

/// Delivers a request to a remote peer and waits for its reply
///
/// `None` means the destination could not be reached or did not answer in time. Callers
/// treat every failure identically and transports must not retry on their own.
pub trait Transport<V>: Send + Sync {
    fn send(&self, to: &str, request: &Request<V>) -> Option<Reply<V>>;
}

/// Receiving end of a peer
pub trait Handler<V>: Send + Sync {
    fn handle(&self, request: Request<V>) -> Reply<V>;

    /// Dead handlers must be treated as unreachable
    fn is_dead(&self) -> bool;
}
