//! Implementation of the Paxos algorithm (single synod version, one synod per sequence number)
//!

use std::fmt;

use log::error;

pub mod acceptor;
pub mod done;
pub mod proposer;
pub mod store;

pub use self::acceptor::Acceptor;
pub use self::done::DoneVector;
pub use self::store::{AgreementStore, Instance};

/// Orders competing proposals for a single instance.
///
/// Every number generated by the peer at index `p` of an `n` peer group is congruent to `p`
/// modulo `n` so proposals from different peers can never collide. Zero is reserved for
/// "no proposal".
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Default)]
pub struct ProposalNumber(pub u64);

impl ProposalNumber {
    pub const NONE: ProposalNumber = ProposalNumber(0);

    /// Returns the smallest number owned by `peer` that is strictly greater than every
    /// number in `last`'s band of `num_peers`
    pub fn next(last: ProposalNumber, num_peers: usize, peer: usize) -> ProposalNumber {
        let n = num_peers as u64;
        ProposalNumber((last.0 / n + 1) * n + peer as u64)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ProposalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N({})", self.0)
    }
}

/// True if `count` votes out of `num_peers` form a strict majority
pub fn is_majority(count: usize, num_peers: usize) -> bool {
    count > num_peers / 2
}

/// Peers disagree about the protocol itself. Continuing could corrupt agreement state so the
/// whole process is taken down.
pub fn protocol_violation(what: &str) -> ! {
    error!("Paxos protocol violation: {}", what);
    std::process::abort()
}
