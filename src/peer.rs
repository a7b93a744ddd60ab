//! Application facing Paxos peer
//!
//! A `Peer` is both proposer and acceptor for an unbounded sequence of independent Paxos
//! instances. All of its mutable state sits inside a single `Acceptor` behind one mutex. The
//! lock is only ever held for local bookkeeping, never across a call to another peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use crate::Seq;
use crate::messages::{Reply, Request};
use crate::network::{Handler, Transport};
use crate::paxos::{proposer, Acceptor};
use crate::value::Value;

/// Longest pause allowed between failed proposal rounds
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Upper bound of the random pause between failed proposal rounds. Zero disables it.
    /// Values above `MAX_RETRY_BACKOFF` are clamped
    pub retry_backoff: Duration
}

impl Default for Options {
    fn default() -> Options {
        Options {
            retry_backoff: Duration::from_millis(10)
        }
    }
}

/// Local knowledge about a single instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status<V> {
    Decided(V),
    /// Not decided as far as this peer knows
    Pending,
    /// Below `min()`. Whatever was decided has been discarded
    Forgotten
}

impl<V> Status<V> {
    pub fn is_decided(&self) -> bool {
        match self {
            Status::Decided(_) => true,
            _ => false
        }
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Status::Decided(v) => Some(v),
            _ => None
        }
    }
}

struct Shared<V> {
    peers: Vec<String>,
    me: usize,
    options: Options,
    transport: Arc<dyn Transport<V>>,
    dead: AtomicBool,
    acceptor: Mutex<Acceptor<V>>
}

pub struct Peer<V> {
    shared: Arc<Shared<V>>
}

impl<V> Clone for Peer<V> {
    fn clone(&self) -> Peer<V> {
        Peer { shared: self.shared.clone() }
    }
}

impl<V: Value> Peer<V> {
    /// `peers` is the full, ordered peer list shared by every member and `me` is this
    /// peer's position in it.
    pub fn new(peers: Vec<String>, me: usize, transport: Arc<dyn Transport<V>>) -> Peer<V> {
        Peer::with_options(peers, me, transport, Options::default())
    }

    pub fn with_options(
        peers: Vec<String>,
        me: usize,
        transport: Arc<dyn Transport<V>>,
        options: Options) -> Peer<V> {

        assert!(me < peers.len(), "peer index {} out of range for {} peers", me, peers.len());

        let num_peers = peers.len();

        Peer {
            shared: Arc::new(Shared {
                peers,
                me,
                options,
                transport,
                dead: AtomicBool::new(false),
                acceptor: Mutex::new(Acceptor::new(me, num_peers))
            })
        }
    }

    /// Begins agreement on `value` for instance `seq` and returns immediately. Use `status`
    /// to find out what was decided, which need not be `value`.
    pub fn start(&self, seq: Seq, value: V) {
        if self.is_dead() {
            return;
        }

        {
            let acceptor = self.acceptor();
            if seq < acceptor.min() {
                debug!("Peer {} ignored start of forgotten instance {}", self.me(), seq);
                return;
            }
            if acceptor.decided(seq).is_some() {
                return;
            }
        }

        let peer = self.clone();

        let spawned = thread::Builder::new()
            .name(format!("proposer-{}-{}", self.me(), seq))
            .spawn(move || proposer::run(&peer, seq, value));

        if let Err(e) = spawned {
            error!("Peer {} failed to spawn proposer for instance {}: {}", self.me(), seq, e);
        }
    }

    /// Purely local. Never contacts other peers
    pub fn status(&self, seq: Seq) -> Status<V> {
        let acceptor = self.acceptor();

        if seq < acceptor.min() {
            return Status::Forgotten;
        }

        match acceptor.decided(seq) {
            Some(v) => Status::Decided(v.clone()),
            None => Status::Pending
        }
    }

    /// The application no longer needs instances <= `seq`. Once every peer has said so
    /// they may be forgotten
    pub fn done(&self, seq: Seq) {
        self.acceptor().set_done(seq);
    }

    /// Highest instance decided here, -1 if none
    pub fn max(&self) -> Seq {
        self.acceptor().max()
    }

    /// Every instance below this has been or may be forgotten
    pub fn min(&self) -> Seq {
        self.acceptor().min()
    }

    /// Stops proposers at their next round and makes this peer unreachable. Calls already
    /// in flight run to completion
    pub fn kill(&self) {
        if !self.shared.dead.swap(true, Ordering::SeqCst) {
            info!("Peer {} killed", self.me());
        }
    }

    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::SeqCst)
    }

    pub fn me(&self) -> usize {
        self.shared.me
    }

    pub fn num_peers(&self) -> usize {
        self.shared.peers.len()
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub(crate) fn acceptor(&self) -> MutexGuard<'_, Acceptor<V>> {
        self.shared.acceptor.lock().unwrap() // Panic if lock fails
    }

    /// Delivers `request` to peer `to`. Requests to ourselves skip the transport but take the
    /// same locked path as remote ones
    pub(crate) fn call(&self, to: usize, request: Request<V>) -> Option<Reply<V>> {
        if to == self.shared.me {
            Some(self.acceptor().receive(request))
        } else {
            self.shared.transport.send(&self.shared.peers[to], &request)
        }
    }
}

impl<V: Value> Handler<V> for Peer<V> {
    fn handle(&self, request: Request<V>) -> Reply<V> {
        self.acceptor().receive(request)
    }

    fn is_dead(&self) -> bool {
        Peer::is_dead(self)
    }
}
