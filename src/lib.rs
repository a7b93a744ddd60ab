//! Paxos-based agreement on a sequence of values among a fixed set of peers.
//!
//! Each peer runs one single-decree Paxos instance per sequence number. Nothing is stored
//! persistently so a peer cannot recover from crash+restart, but the protocol copes with
//! message loss, duplication, reordering and network partitions.
//!
//! ```text
//! let peer = Peer::new(peers, me, transport);
//! peer.start(seq, v);     // start agreement on a new instance
//! peer.status(seq);       // has this peer learned the decided value?
//! peer.done(seq);         // ok to forget all instances <= seq
//! peer.max();             // highest instance seq decided, or -1
//! peer.min();             // instances before this seq have been forgotten
//! ```

pub mod config;
pub mod data;
pub mod encoding;
pub mod messages;
pub mod network;
pub mod paxos;
pub mod peer;
pub mod value;

pub use crate::messages::{Reply, Request};
pub use crate::network::{Handler, Transport};
pub use crate::peer::{Options, Peer, Status};
pub use crate::value::Value;

/// Identifies a Paxos instance. Valid instances are >= 0; -1 is used by the done vector
/// and by `Peer::max` to mean "none".
pub type Seq = i64;
