//! In-process network with fault injection
//!
//! Requests are delivered by calling the destination's `Handler` directly on the sending
//! thread. Destinations may be marked unreliable, in which case 10% of requests are
//! discarded before delivery and another 10% are processed but lose their reply. The
//! network can also be split into partitions; addresses not named in any partition group
//! are isolated until `heal()` is called.
//!
//! Destinations marked as duplicating receive every request twice, each preceded by a replay
//! of a randomly chosen older request to the same destination. This exercises message
//! duplication and reordering.
//!
//! Transports only hold a weak reference to the network. Peers registered here usually own
//! a transport of the same network, so a strong one would keep both alive forever.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use log::trace;
use rand::Rng;

use crate::messages::{Reply, Request};
use crate::network::{Handler, Transport};
use crate::value::Value;

/// Older requests kept per duplicating destination for later replay
const REPLAY_WINDOW: usize = 8;

struct NetState<V> {
    handlers: HashMap<String, Arc<dyn Handler<V>>>,
    unreliable: HashSet<String>,
    duplicating: HashMap<String, Vec<Request<V>>>,
    partition: Option<HashMap<String, usize>>,
    rpc_counts: HashMap<String, usize>
}

impl<V> NetState<V> {
    fn reachable(&self, from: &str, to: &str) -> bool {
        match &self.partition {
            None => true,
            Some(groups) => match (groups.get(from), groups.get(to)) {
                (Some(a), Some(b)) => a == b,
                _ => false
            }
        }
    }
}

pub struct MemoryNetwork<V> {
    state: Arc<Mutex<NetState<V>>>
}

impl<V> Clone for MemoryNetwork<V> {
    fn clone(&self) -> MemoryNetwork<V> {
        MemoryNetwork { state: self.state.clone() }
    }
}

impl<V: Value> MemoryNetwork<V> {
    pub fn new() -> MemoryNetwork<V> {
        MemoryNetwork {
            state: Arc::new(Mutex::new(NetState {
                handlers: HashMap::new(),
                unreliable: HashSet::new(),
                duplicating: HashMap::new(),
                partition: None,
                rpc_counts: HashMap::new()
            }))
        }
    }

    /// Makes `handler` reachable at `address`, replacing any previous registration
    pub fn register(&self, address: &str, handler: Arc<dyn Handler<V>>) {
        self.state.lock().unwrap().handlers.insert(address.to_string(), handler);
    }

    pub fn unregister(&self, address: &str) {
        self.state.lock().unwrap().handlers.remove(address);
    }

    /// Returns a transport that sends from `from`. The source address matters only for
    /// partitioning
    pub fn transport(&self, from: &str) -> Arc<dyn Transport<V>> {
        Arc::new(MemoryTransport {
            from: from.to_string(),
            state: Arc::downgrade(&self.state)
        })
    }

    pub fn set_unreliable(&self, address: &str, unreliable: bool) {
        let mut state = self.state.lock().unwrap();
        if unreliable {
            state.unreliable.insert(address.to_string());
        } else {
            state.unreliable.remove(address);
        }
    }

    /// Delivers each request to `address` twice and replays stale ones in between
    pub fn set_duplicating(&self, address: &str, duplicating: bool) {
        let mut state = self.state.lock().unwrap();
        if duplicating {
            state.duplicating.entry(address.to_string()).or_insert_with(Vec::new);
        } else {
            state.duplicating.remove(address);
        }
    }

    /// Only addresses within the same group can reach each other
    pub fn partition(&self, groups: &[&[&str]]) {
        let mut membership = HashMap::new();
        for (i, group) in groups.iter().enumerate() {
            for address in group.iter() {
                membership.insert(address.to_string(), i);
            }
        }
        self.state.lock().unwrap().partition = Some(membership);
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().partition = None;
    }

    /// Number of requests delivered to `address`, not counting duplicates and replays
    pub fn rpc_count(&self, address: &str) -> usize {
        self.state.lock().unwrap().rpc_counts.get(address).cloned().unwrap_or(0)
    }
}

struct MemoryTransport<V> {
    from: String,
    state: Weak<Mutex<NetState<V>>>
}

impl<V: Value> Transport<V> for MemoryTransport<V> {
    fn send(&self, to: &str, request: &Request<V>) -> Option<Reply<V>> {
        let state = self.state.upgrade()?;

        let (handler, drop_reply, replay) = {
            let mut state = state.lock().unwrap(); // Panic if lock fails

            if !state.reachable(&self.from, to) {
                trace!("{} -> {}: partitioned", self.from, to);
                return None;
            }

            let handler = state.handlers.get(to)?.clone();

            if handler.is_dead() {
                return None;
            }

            let roll = if state.unreliable.contains(to) {
                rand::thread_rng().gen_range(0, 1000)
            } else {
                1000
            };

            if roll < 100 {
                trace!("{} -> {}: discarded {} request", self.from, to, request.kind());
                return None;
            }

            *state.rpc_counts.entry(to.to_string()).or_insert(0) += 1;

            let replay = match state.duplicating.get_mut(to) {
                None => None,
                Some(window) => {
                    let replay = if window.is_empty() {
                        None
                    } else {
                        Some(window[rand::thread_rng().gen_range(0, window.len())].clone())
                    };
                    if window.len() == REPLAY_WINDOW {
                        window.remove(0);
                    }
                    window.push(request.clone());
                    Some(replay)
                }
            };

            (handler, roll < 200, replay)
        };

        if let Some(stale) = replay {
            if let Some(old) = stale {
                trace!("{} -> {}: replaying stale {} for instance {}", self.from, to, old.kind(),
                    old.seq());
                handler.handle(old);
            }
            handler.handle(request.clone());
        }

        if drop_reply {
            handler.handle(request.clone());
            trace!("{} -> {}: discarded {} reply", self.from, to, request.kind());
            return None;
        }

        Some(handler.handle(request.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::paxos::ProposalNumber;

    struct Echo {
        calls: AtomicUsize,
        dead: AtomicBool
    }

    impl Handler<u64> for Echo {
        fn handle(&self, request: Request<u64>) -> Reply<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request {
                Request::Accept { number, .. } => Reply::AcceptOk { accepted: number },
                _ => Reply::Decided
            }
        }

        fn is_dead(&self) -> bool {
            self.dead.load(Ordering::SeqCst)
        }
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo { calls: AtomicUsize::new(0), dead: AtomicBool::new(false) })
    }

    fn accept() -> Request<u64> {
        Request::Accept { seq: 0, number: ProposalNumber(3), value: 1 }
    }

    #[test]
    fn delivers_to_registered_handler() {
        let net: MemoryNetwork<u64> = MemoryNetwork::new();
        let e = echo();
        net.register("b", e.clone());

        let t = net.transport("a");
        assert_eq!(t.send("b", &accept()), Some(Reply::AcceptOk { accepted: ProposalNumber(3) }));
        assert_eq!(t.send("c", &accept()), None);
        assert_eq!(net.rpc_count("b"), 1);
        assert_eq!(e.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dead_handlers_are_unreachable() {
        let net: MemoryNetwork<u64> = MemoryNetwork::new();
        let e = echo();
        net.register("b", e.clone());
        e.dead.store(true, Ordering::SeqCst);

        assert_eq!(net.transport("a").send("b", &accept()), None);
        assert_eq!(e.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn partitions() {
        let net: MemoryNetwork<u64> = MemoryNetwork::new();
        net.register("a", echo());
        net.register("b", echo());
        net.register("c", echo());

        net.partition(&[&["a", "b"], &["c"]]);
        assert!(net.transport("a").send("b", &accept()).is_some());
        assert!(net.transport("a").send("c", &accept()).is_none());
        assert!(net.transport("c").send("c", &accept()).is_some());
        assert!(net.transport("x").send("a", &accept()).is_none());

        net.heal();
        assert!(net.transport("a").send("c", &accept()).is_some());
    }

    #[test]
    fn unreliable_destination_loses_some_messages() {
        let net: MemoryNetwork<u64> = MemoryNetwork::new();
        let e = echo();
        net.register("b", e.clone());
        net.set_unreliable("b", true);

        let t = net.transport("a");
        let replies = (0..2000).filter(|_| t.send("b", &accept()).is_some()).count();

        // Expect roughly 80% delivered
        assert!(replies > 1400 && replies < 1800, "{} replies", replies);
        assert!(e.calls.load(Ordering::SeqCst) > replies);

        net.set_unreliable("b", false);
        assert!((0..50).all(|_| t.send("b", &accept()).is_some()));
    }

    #[test]
    fn duplicating_destination_sees_copies_and_replays() {
        let net: MemoryNetwork<u64> = MemoryNetwork::new();
        let e = echo();
        net.register("b", e.clone());
        net.set_duplicating("b", true);

        let t = net.transport("a");
        assert!(t.send("b", &accept()).is_some());
        assert_eq!(e.calls.load(Ordering::SeqCst), 2);

        assert!(t.send("b", &accept()).is_some());
        assert_eq!(e.calls.load(Ordering::SeqCst), 5);
        assert_eq!(net.rpc_count("b"), 2);

        net.set_duplicating("b", false);
        t.send("b", &accept());
        assert_eq!(e.calls.load(Ordering::SeqCst), 6);
    }

    struct Relay {
        transport: Arc<dyn Transport<u64>>
    }

    impl Handler<u64> for Relay {
        fn handle(&self, request: Request<u64>) -> Reply<u64> {
            self.transport.send("elsewhere", &request).unwrap_or(Reply::Decided)
        }

        fn is_dead(&self) -> bool {
            false
        }
    }

    #[test]
    fn registered_handlers_are_freed_with_the_network() {
        let net: MemoryNetwork<u64> = MemoryNetwork::new();
        let relay = Arc::new(Relay { transport: net.transport("a") });
        let weak = Arc::downgrade(&relay);
        net.register("a", relay);

        let t = net.transport("x");
        assert_eq!(t.send("a", &accept()), Some(Reply::Decided));

        drop(net);
        assert!(weak.upgrade().is_none());
        assert_eq!(t.send("a", &accept()), None);
    }
}
