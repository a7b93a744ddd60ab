use crate::Seq;
use crate::paxos::ProposalNumber;

/// Messages handled by a peer's acceptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request<V> {
    Prepare {
        seq: Seq,
        number: ProposalNumber,
        /// Sender's done vector, piggybacked for garbage collection
        done: Vec<Seq>
    },
    Accept {
        seq: Seq,
        number: ProposalNumber,
        value: V
    },
    Decide {
        seq: Seq,
        value: V
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply<V> {
    PrepareOk {
        /// Number of the highest proposal accepted so far for the instance. NONE if none
        accepted: ProposalNumber,
        value: Option<V>,
        done: Vec<Seq>
    },
    PrepareReject {
        promised: ProposalNumber,
        done: Vec<Seq>
    },
    AcceptOk {
        accepted: ProposalNumber
    },
    AcceptReject {
        promised: ProposalNumber
    },
    Decided
}

impl<V> Request<V> {
    pub fn seq(&self) -> Seq {
        match self {
            Request::Prepare { seq, .. } => *seq,
            Request::Accept { seq, .. } => *seq,
            Request::Decide { seq, .. } => *seq
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Prepare { .. } => "Prepare",
            Request::Accept { .. } => "Accept",
            Request::Decide { .. } => "Decide"
        }
    }
}
