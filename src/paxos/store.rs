//! Per-instance agreement state and the decided log
//!
//! Both maps are keyed by sequence number and ordered so that garbage collection can drop
//! everything below the global minimum with a single split.

use std::collections::BTreeMap;

use log::error;

use crate::Seq;
use super::ProposalNumber;

/// Acceptor and proposer bookkeeping for a single Paxos instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance<V> {
    /// Highest Prepare/Accept number this peer has promised not to undercut
    pub promised: ProposalNumber,

    /// Number under which `accepted_value` was accepted. NONE if nothing was accepted
    pub accepted: ProposalNumber,

    pub accepted_value: Option<V>,

    /// Last proposal number used, or observed in a reject, by the local proposer
    pub last_proposal: ProposalNumber
}

impl<V> Default for Instance<V> {
    fn default() -> Instance<V> {
        Instance {
            promised: ProposalNumber::NONE,
            accepted: ProposalNumber::NONE,
            accepted_value: None,
            last_proposal: ProposalNumber::NONE
        }
    }
}

pub struct AgreementStore<V> {
    instances: BTreeMap<Seq, Instance<V>>,
    decided: BTreeMap<Seq, V>,

    /// Survives garbage collection so that `Peer::max` never moves backwards
    highest_decided: Seq
}

impl<V: Clone + PartialEq + std::fmt::Debug> AgreementStore<V> {
    pub fn new() -> AgreementStore<V> {
        AgreementStore {
            instances: BTreeMap::new(),
            decided: BTreeMap::new(),
            highest_decided: -1
        }
    }

    /// Returns a copy of the instance record. Absent instances read as the zero value
    pub fn instance(&self, seq: Seq) -> Instance<V> {
        self.instances.get(&seq).cloned().unwrap_or_default()
    }

    /// Replaces the entire instance record
    pub fn set_instance(&mut self, seq: Seq, instance: Instance<V>) {
        self.instances.insert(seq, instance);
    }

    pub fn decided(&self, seq: Seq) -> Option<&V> {
        self.decided.get(&seq)
    }

    /// Records the decided value for `seq`. The first value wins; Paxos guarantees that any
    /// later Decide for the same instance carries the same value.
    pub fn decide(&mut self, seq: Seq, value: V) {
        match self.decided.get(&seq) {
            Some(existing) => {
                if *existing != value {
                    error!("Conflicting decision for instance {}: have {:?}, received {:?}",
                        seq, existing, value);
                }
            },
            None => {
                self.decided.insert(seq, value);
                if seq > self.highest_decided {
                    self.highest_decided = seq;
                }
            }
        }
    }

    /// Highest sequence number ever decided on this peer, or -1
    pub fn highest_decided(&self) -> Seq {
        self.highest_decided
    }

    /// Forgets every instance and decided value below `min`. Returns the number of entries
    /// dropped
    pub fn prune_below(&mut self, min: Seq) -> usize {
        let before = self.instances.len() + self.decided.len();

        self.instances = self.instances.split_off(&min);
        self.decided = self.decided.split_off(&min);

        before - (self.instances.len() + self.decided.len())
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn num_decided(&self) -> usize {
        self.decided.len()
    }
}
