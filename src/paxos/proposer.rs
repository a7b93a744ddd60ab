use std::thread;
use std::time::Duration;

use log::{debug, info, trace};
use rand::Rng;

use crate::Seq;
use crate::messages::{Reply, Request};
use crate::peer::{Peer, MAX_RETRY_BACKOFF};
use crate::value::Value;
use super::*;

/// Vote tally for a single Prepare/Accept attempt
pub struct Round<V> {
    num_peers: usize,
    promises: usize,
    accepts: usize,
    highest_accepted: Option<(ProposalNumber, V)>,
    highest_nack: ProposalNumber
}

impl<V: Clone> Round<V> {
    pub fn new(num_peers: usize) -> Round<V> {
        Round {
            num_peers,
            promises: 0,
            accepts: 0,
            highest_accepted: None,
            highest_nack: ProposalNumber::NONE
        }
    }

    pub fn num_promises(&self) -> usize { self.promises }
    pub fn num_accepts(&self) -> usize { self.accepts }

    /// Highest number reported by a rejecting peer during this round
    pub fn highest_nack(&self) -> ProposalNumber {
        self.highest_nack
    }

    pub fn receive_promise(&mut self, accepted: ProposalNumber, value: Option<V>) {
        self.promises += 1;

        if let Some(v) = value {
            if accepted.is_none() {
                return;
            }
            let higher = match &self.highest_accepted {
                None => true,
                Some((n, _)) => accepted > *n
            };
            if higher {
                self.highest_accepted = Some((accepted, v));
            }
        }
    }

    pub fn receive_nack(&mut self, promised: ProposalNumber) {
        if promised > self.highest_nack {
            self.highest_nack = promised;
        }
    }

    pub fn receive_accepted(&mut self) {
        self.accepts += 1;
    }

    pub fn prepare_quorum_reached(&self) -> bool {
        is_majority(self.promises, self.num_peers)
    }

    pub fn accept_quorum_reached(&self) -> bool {
        is_majority(self.accepts, self.num_peers)
    }

    /// The value this round must propose. A value accepted under an earlier proposal may
    /// already be chosen so it takes precedence over the local one.
    pub fn proposal_value(&self, local: &V) -> V {
        match &self.highest_accepted {
            Some((_, v)) => v.clone(),
            None => local.clone()
        }
    }
}

/// Drives instance `seq` to a decision. Returns once the instance is decided (by this
/// proposer or anyone else), forgotten, or the peer is killed.
pub(crate) fn run<V: Value>(peer: &Peer<V>, seq: Seq, value: V) {
    let num_peers = peer.num_peers();
    let mut attempts = 0u64;

    while !peer.is_dead() {
        let (number, done) = {
            let mut acceptor = peer.acceptor();

            if seq < acceptor.min() || acceptor.decided(seq).is_some() {
                trace!("Peer {} stops proposing for instance {}", peer.me(), seq);
                return;
            }

            (acceptor.next_proposal_number(seq, num_peers), acceptor.done_vector().to_vec())
        };

        attempts += 1;

        let mut round = Round::new(num_peers);

        for i in 0..num_peers {
            let request = Request::Prepare { seq, number, done: done.clone() };

            match peer.call(i, request) {
                None => (),
                Some(Reply::PrepareOk { accepted, value, done }) => {
                    peer.acceptor().merge_done(&done);
                    round.receive_promise(accepted, value);
                },
                Some(Reply::PrepareReject { promised, done }) => {
                    let mut acceptor = peer.acceptor();
                    acceptor.merge_done(&done);
                    acceptor.observe_promise(seq, promised);
                    round.receive_nack(promised);
                },
                Some(r) => protocol_violation(&format!("reply {:?} to Prepare", r))
            }
        }

        if !round.prepare_quorum_reached() {
            debug!("Peer {} instance {} {}: {} of {} promises, highest nack {}", peer.me(), seq,
                number, round.num_promises(), num_peers, round.highest_nack());
            backoff(peer);
            continue;
        }

        let chosen = round.proposal_value(&value);

        for i in 0..num_peers {
            let request = Request::Accept { seq, number, value: chosen.clone() };

            match peer.call(i, request) {
                None => (),
                Some(Reply::AcceptOk { accepted }) => {
                    if accepted == number {
                        round.receive_accepted();
                    }
                },
                Some(Reply::AcceptReject { promised }) => {
                    peer.acceptor().observe_promise(seq, promised);
                    round.receive_nack(promised);
                },
                Some(r) => protocol_violation(&format!("reply {:?} to Accept", r))
            }
        }

        if !round.accept_quorum_reached() {
            debug!("Peer {} instance {} {}: {} of {} accepts", peer.me(), seq, number,
                round.num_accepts(), num_peers);
            backoff(peer);
            continue;
        }

        for i in 0..num_peers {
            // Best effort. Peers that miss it learn the value from a later proposer
            let _ = peer.call(i, Request::Decide { seq, value: chosen.clone() });
        }

        info!("Peer {} decided instance {} with {} after {} attempt(s)", peer.me(), seq, number,
            attempts);
        return;
    }
}

fn backoff<V: Value>(peer: &Peer<V>) {
    let pause = backoff_duration(peer.options().retry_backoff);
    if pause > Duration::from_millis(0) {
        thread::sleep(pause);
    }
}

/// Uniform in `[0, max]` with `max` clamped to `MAX_RETRY_BACKOFF`
fn backoff_duration(max: Duration) -> Duration {
    let max = if max > MAX_RETRY_BACKOFF { MAX_RETRY_BACKOFF } else { max };
    if max == Duration::from_millis(0) {
        return max;
    }
    let max_us = max.as_micros() as u64;
    Duration::from_micros(rand::thread_rng().gen_range(0, max_us + 1))
}
