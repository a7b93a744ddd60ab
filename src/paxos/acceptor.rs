use log::{debug, trace};

use crate::Seq;
use crate::messages::{Reply, Request};
use super::*;

/// All mutable Paxos state owned by a single peer
///
/// The peer keeps exactly one of these behind its lock. Remote requests and the local
/// proposer's self-delivered requests both go through `receive`, so there is no path that
/// touches instance, decided or done state without holding that lock.
pub struct Acceptor<V> {
    peer_id: usize,
    store: AgreementStore<V>,
    done: DoneVector
}

impl<V: Clone + PartialEq + std::fmt::Debug> Acceptor<V> {
    pub fn new(peer_id: usize, num_peers: usize) -> Acceptor<V> {
        assert!(peer_id < num_peers);
        Acceptor {
            peer_id,
            store: AgreementStore::new(),
            done: DoneVector::new(num_peers)
        }
    }

    pub fn store(&self) -> &AgreementStore<V> {
        &self.store
    }

    pub fn done_vector(&self) -> &DoneVector {
        &self.done
    }

    /// Handles one request and then garbage collects anything the (possibly updated) done
    /// vector allows us to forget
    pub fn receive(&mut self, request: Request<V>) -> Reply<V> {
        let reply = match request {
            Request::Prepare { seq, number, done } => self.receive_prepare(seq, number, &done),
            Request::Accept { seq, number, value } => self.receive_accept(seq, number, value),
            Request::Decide { seq, value } => {
                self.receive_decide(seq, value);
                Reply::Decided
            }
        };
        self.collect_garbage();
        reply
    }

    pub fn receive_prepare(&mut self, seq: Seq, number: ProposalNumber, sender_done: &[Seq]) -> Reply<V> {
        self.done.merge(sender_done);

        if seq < self.min() {
            // Forgotten. Re-promising would let a new value be chosen for it
            return Reply::PrepareReject {
                promised: ProposalNumber::NONE,
                done: self.done.to_vec()
            };
        }

        let mut instance = self.store.instance(seq);

        if number > instance.promised {
            instance.promised = number;
            let accepted = instance.accepted;
            let value = instance.accepted_value.clone();
            self.store.set_instance(seq, instance);

            trace!("Peer {} promised {} for instance {}", self.peer_id, number, seq);

            Reply::PrepareOk {
                accepted,
                value,
                done: self.done.to_vec()
            }
        } else {
            Reply::PrepareReject {
                promised: instance.promised,
                done: self.done.to_vec()
            }
        }
    }

    pub fn receive_accept(&mut self, seq: Seq, number: ProposalNumber, value: V) -> Reply<V> {
        if seq < self.min() {
            return Reply::AcceptReject { promised: ProposalNumber::NONE };
        }

        let instance = self.store.instance(seq);

        if number >= instance.promised {
            self.store.set_instance(seq, Instance {
                promised: number,
                accepted: number,
                accepted_value: Some(value),
                last_proposal: instance.last_proposal
            });

            trace!("Peer {} accepted {} for instance {}", self.peer_id, number, seq);

            Reply::AcceptOk { accepted: number }
        } else {
            Reply::AcceptReject { promised: instance.promised }
        }
    }

    pub fn receive_decide(&mut self, seq: Seq, value: V) {
        if seq < self.min() {
            return;
        }
        if self.store.decided(seq).is_none() {
            debug!("Peer {} learned decision for instance {}: {:?}", self.peer_id, seq, value);
        }
        self.store.decide(seq, value);
    }

    /// Allocates the local proposer's next number for `seq` and remembers it
    pub fn next_proposal_number(&mut self, seq: Seq, num_peers: usize) -> ProposalNumber {
        let mut instance = self.store.instance(seq);
        let number = ProposalNumber::next(instance.last_proposal, num_peers, self.peer_id);
        instance.last_proposal = number;
        self.store.set_instance(seq, instance);
        number
    }

    /// Used to reduce the chance of another reject on the next attempt
    pub fn observe_promise(&mut self, seq: Seq, promised: ProposalNumber) {
        if seq < self.min() {
            return;
        }
        let mut instance = self.store.instance(seq);
        if promised > instance.last_proposal {
            instance.last_proposal = promised;
            self.store.set_instance(seq, instance);
        }
    }

    /// Merges a done vector carried by a reply
    pub fn merge_done(&mut self, other: &[Seq]) {
        if self.done.merge(other) {
            self.collect_garbage();
        }
    }

    /// Records that the local application is finished with every instance <= seq
    pub fn set_done(&mut self, seq: Seq) {
        if self.done.advance(self.peer_id, seq) {
            self.collect_garbage();
        } else {
            debug!("Peer {} ignored done({}) at or below {}", self.peer_id, seq,
                self.done.as_slice()[self.peer_id]);
        }
    }

    pub fn collect_garbage(&mut self) {
        let min = self.min();
        let dropped = self.store.prune_below(min);
        if dropped > 0 {
            debug!("Peer {} forgot {} entries below instance {}", self.peer_id, dropped, min);
        }
    }

    pub fn decided(&self, seq: Seq) -> Option<&V> {
        self.store.decided(seq)
    }

    pub fn max(&self) -> Seq {
        self.store.highest_decided()
    }

    pub fn min(&self) -> Seq {
        self.done.global_min()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn prepare(seq: Seq, n: u64, done: Vec<Seq>) -> Request<String> {
        Request::Prepare { seq, number: ProposalNumber(n), done }
    }

    fn accept(seq: Seq, n: u64, v: &str) -> Request<String> {
        Request::Accept { seq, number: ProposalNumber(n), value: v.to_string() }
    }

    fn decide(seq: Seq, v: &str) -> Request<String> {
        Request::Decide { seq, value: v.to_string() }
    }

    #[test]
    fn promise_first() {
        let mut a = Acceptor::new(0, 3);

        assert_eq!(a.receive(prepare(0, 4, vec![-1, -1, -1])), Reply::PrepareOk {
            accepted: ProposalNumber::NONE,
            value: None,
            done: vec![-1, -1, -1]
        });
        assert_eq!(a.store().instance(0).promised, ProposalNumber(4));
    }

    #[test]
    fn promise_higher() {
        let mut a = Acceptor::new(0, 3);

        a.receive(prepare(0, 4, vec![-1, -1, -1]));
        match a.receive(prepare(0, 5, vec![-1, -1, -1])) {
            Reply::PrepareOk { .. } => (),
            r => panic!("unexpected {:?}", r)
        }
        assert_eq!(a.store().instance(0).promised, ProposalNumber(5));
    }

    #[test]
    fn promise_nack_lower_or_equal() {
        let mut a = Acceptor::new(0, 3);

        a.receive(prepare(0, 5, vec![-1, -1, -1]));

        assert_eq!(a.receive(prepare(0, 4, vec![-1, -1, -1])), Reply::PrepareReject {
            promised: ProposalNumber(5),
            done: vec![-1, -1, -1]
        });
        assert_eq!(a.receive(prepare(0, 5, vec![-1, -1, -1])), Reply::PrepareReject {
            promised: ProposalNumber(5),
            done: vec![-1, -1, -1]
        });
        assert_eq!(a.store().instance(0).promised, ProposalNumber(5));
    }

    #[test]
    fn promise_reports_previously_accepted_value() {
        let mut a = Acceptor::new(0, 3);

        a.receive(accept(2, 4, "x"));

        assert_eq!(a.receive(prepare(2, 7, vec![-1, -1, -1])), Reply::PrepareOk {
            accepted: ProposalNumber(4),
            value: Some("x".to_string()),
            done: vec![-1, -1, -1]
        });
    }

    #[test]
    fn accept_first() {
        let mut a = Acceptor::new(0, 3);

        assert_eq!(a.receive(accept(0, 4, "x")), Reply::AcceptOk { accepted: ProposalNumber(4) });

        let i = a.store().instance(0);
        assert_eq!(i.promised, ProposalNumber(4));
        assert_eq!(i.accepted, ProposalNumber(4));
        assert_eq!(i.accepted_value, Some("x".to_string()));
    }

    #[test]
    fn accept_equal_to_promise() {
        let mut a = Acceptor::new(0, 3);

        a.receive(prepare(0, 4, vec![-1, -1, -1]));
        assert_eq!(a.receive(accept(0, 4, "x")), Reply::AcceptOk { accepted: ProposalNumber(4) });
    }

    #[test]
    fn accept_nack_lower() {
        let mut a = Acceptor::new(0, 3);

        a.receive(prepare(0, 7, vec![-1, -1, -1]));
        assert_eq!(a.receive(accept(0, 4, "x")), Reply::AcceptReject { promised: ProposalNumber(7) });

        let i = a.store().instance(0);
        assert_eq!(i.accepted, ProposalNumber::NONE);
        assert_eq!(i.accepted_value, None);
    }

    #[test]
    fn accept_preserves_proposer_bookkeeping() {
        let mut a: Acceptor<String> = Acceptor::new(1, 3);

        let n = a.next_proposal_number(0, 3);
        assert_eq!(n, ProposalNumber(4));
        a.receive(accept(0, 9, "x"));
        assert_eq!(a.store().instance(0).last_proposal, ProposalNumber(4));
    }

    #[test]
    fn observed_promises_push_next_number_higher() {
        let mut a: Acceptor<String> = Acceptor::new(0, 3);

        assert_eq!(a.next_proposal_number(0, 3), ProposalNumber(3));
        a.observe_promise(0, ProposalNumber(10));
        a.observe_promise(0, ProposalNumber(8));
        assert_eq!(a.store().instance(0).last_proposal, ProposalNumber(10));
        assert_eq!(a.next_proposal_number(0, 3), ProposalNumber(12));
    }

    #[test]
    fn decide_is_idempotent() {
        let mut a = Acceptor::new(0, 3);

        assert_eq!(a.receive(decide(1, "x")), Reply::Decided);
        assert_eq!(a.receive(decide(1, "x")), Reply::Decided);
        assert_eq!(a.decided(1), Some(&"x".to_string()));
        assert_eq!(a.max(), 1);
    }

    #[test]
    fn prepare_merges_sender_done_vector() {
        let mut a: Acceptor<String> = Acceptor::new(0, 3);

        a.set_done(3);
        let r = a.receive(prepare(9, 4, vec![-1, 5, 2]));
        assert_eq!(r, Reply::PrepareOk {
            accepted: ProposalNumber::NONE,
            value: None,
            done: vec![3, 5, 2]
        });
        assert_eq!(a.min(), 3);
    }

    #[test]
    fn garbage_collects_after_each_message() {
        let mut a = Acceptor::new(0, 2);

        for seq in 0..4 {
            a.receive(accept(seq, 2, "v"));
            a.receive(decide(seq, "v"));
        }
        assert_eq!(a.store().num_instances(), 4);
        assert_eq!(a.store().num_decided(), 4);

        a.set_done(2);
        assert_eq!(a.store().num_decided(), 4);

        a.receive(prepare(8, 3, vec![-1, 1]));
        assert_eq!(a.min(), 2);
        assert_eq!(a.decided(1), None);
        assert_eq!(a.decided(2), Some(&"v".to_string()));
        assert_eq!(a.store().num_decided(), 2);
        assert_eq!(a.max(), 3);
    }

    #[test]
    fn forgotten_instances_are_never_revived() {
        let mut a = Acceptor::new(0, 1);

        a.receive(decide(0, "x"));
        a.set_done(0);
        assert_eq!(a.min(), 1);
        assert_eq!(a.decided(0), None);

        assert_eq!(a.receive(prepare(0, 5, vec![0])), Reply::PrepareReject {
            promised: ProposalNumber::NONE,
            done: vec![0]
        });
        assert_eq!(a.receive(accept(0, 5, "y")), Reply::AcceptReject { promised: ProposalNumber::NONE });
        a.receive(decide(0, "y"));

        assert_eq!(a.decided(0), None);
        assert_eq!(a.store().num_instances(), 0);
    }

    #[test]
    fn done_never_moves_backwards() {
        let mut a: Acceptor<String> = Acceptor::new(0, 1);

        a.set_done(5);
        a.set_done(2);
        assert_eq!(a.done_vector().as_slice(), &[5]);
        assert_eq!(a.min(), 6);
    }
}
