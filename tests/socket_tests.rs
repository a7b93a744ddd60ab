use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempdir::TempDir;

use paxos_peer::network::socket::{Listener, SocketKind, SocketTransport};
use paxos_peer::paxos::ProposalNumber;
use paxos_peer::{Handler, Options, Peer, Reply, Request, Seq, Status, Transport};

fn init_logging() {
    let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
}

struct SocketCluster {
    peers: Vec<Peer<String>>,
    listeners: Vec<Listener>
}

impl SocketCluster {
    /// Binds every listener first so that TCP clusters can use ephemeral ports
    fn new(kind: SocketKind, bind_addrs: Vec<String>) -> SocketCluster {
        init_logging();

        let mut listeners: Vec<Listener> = bind_addrs.iter()
            .map(|a| Listener::bind(kind, a).unwrap())
            .collect();

        let addrs: Vec<String> = listeners.iter().map(|l| l.local_address().to_string()).collect();

        let mut peers = Vec::new();

        for (i, l) in listeners.iter_mut().enumerate() {
            let transport: Arc<dyn Transport<String>> =
                Arc::new(SocketTransport::new(kind, Duration::from_millis(500)));
            let options = Options { retry_backoff: Duration::from_millis(5) };
            let p = Peer::with_options(addrs.clone(), i, transport, options);

            let handler: Arc<dyn Handler<String>> = Arc::new(p.clone());
            l.serve(handler, 2).unwrap();

            peers.push(p);
        }

        SocketCluster { peers, listeners }
    }

    fn unix(dir: &TempDir, n: usize) -> SocketCluster {
        let addrs = (0..n)
            .map(|i| dir.path().join(format!("px-{}", i)).to_string_lossy().into_owned())
            .collect();
        SocketCluster::new(SocketKind::Unix, addrs)
    }

    fn tcp(n: usize) -> SocketCluster {
        SocketCluster::new(SocketKind::Tcp, (0..n).map(|_| "127.0.0.1:0".to_string()).collect())
    }

    fn wait_all(&self, seq: Seq) -> String {
        let start = Instant::now();
        loop {
            let statuses: Vec<Status<String>> = self.peers.iter().map(|p| p.status(seq)).collect();

            if statuses.iter().all(|s| s.is_decided()) {
                let v = statuses[0].value().unwrap().clone();
                for s in &statuses {
                    assert_eq!(s.value(), Some(&v));
                }
                return v;
            }

            if start.elapsed() > Duration::from_secs(10) {
                panic!("instance {} not decided everywhere: {:?}", seq, statuses);
            }

            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for SocketCluster {
    fn drop(&mut self) {
        for p in &self.peers {
            p.kill();
        }
        for l in self.listeners.iter_mut() {
            l.shutdown();
        }
    }
}

#[test]
fn unix_cluster_decides() {
    let dir = TempDir::new("paxos-peer").unwrap();
    let c = SocketCluster::unix(&dir, 3);

    c.peers[0].start(0, "hello".to_string());
    assert_eq!(c.wait_all(0), "hello");

    c.peers[2].start(1, "world".to_string());
    assert_eq!(c.wait_all(1), "world");
    assert_eq!(c.peers[1].max(), 1);

    // Prepare, Accept and Decide per instance, none of them self-addressed
    assert_eq!(c.listeners[1].rpc_count(), 6);
}

#[test]
fn tcp_cluster_decides_concurrent_proposals() {
    let c = SocketCluster::tcp(3);

    for p in &c.peers {
        p.start(0, format!("from-{}", p.me()));
    }

    let v = c.wait_all(0);
    assert!(v.starts_with("from-"), "decided {}", v);
}

#[test]
fn unreliable_listeners_keep_agreement() {
    let dir = TempDir::new("paxos-peer").unwrap();
    let c = SocketCluster::unix(&dir, 3);

    for l in &c.listeners {
        l.set_unreliable(true);
    }

    for seq in 0..5 {
        for p in &c.peers {
            p.start(seq, format!("{}-{}", seq, p.me()));
        }
    }

    for seq in 0..5 {
        let v = c.wait_all(seq);
        assert!(v.starts_with(&format!("{}-", seq)));
    }
}

#[test]
fn done_propagates_over_sockets() {
    let dir = TempDir::new("paxos-peer").unwrap();
    let c = SocketCluster::unix(&dir, 3);

    c.peers[0].start(0, "a".to_string());
    c.wait_all(0);

    for p in &c.peers {
        p.done(0);
    }
    for (i, p) in c.peers.iter().enumerate() {
        p.start(1 + i as Seq, "b".to_string());
    }

    let start = Instant::now();
    while c.peers.iter().any(|p| p.min() != 1) {
        assert!(start.elapsed() < Duration::from_secs(10), "min never advanced");
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(c.peers[1].status(0), Status::Forgotten);
}

#[test]
fn killed_peer_refuses_requests() {
    let dir = TempDir::new("paxos-peer").unwrap();
    let c = SocketCluster::unix(&dir, 1);

    let t = SocketTransport::new(SocketKind::Unix, Duration::from_millis(500));
    let to = c.listeners[0].local_address().to_string();
    let prepare: Request<String> = Request::Prepare { seq: 0, number: ProposalNumber(1), done: vec![-1] };

    match t.send(&to, &prepare) {
        Some(Reply::PrepareOk { .. }) => (),
        r => panic!("unexpected {:?}", r)
    }

    c.peers[0].kill();

    let r: Option<Reply<String>> = t.send(&to, &prepare);
    assert_eq!(r, None);
    assert_eq!(c.listeners[0].rpc_count(), 1);
}

#[test]
fn unreachable_addresses_yield_no_reply() {
    let dir = TempDir::new("paxos-peer").unwrap();
    let missing = dir.path().join("nobody").to_string_lossy().into_owned();

    let t = SocketTransport::new(SocketKind::Unix, Duration::from_millis(200));
    let r: Option<Reply<String>> = t.send(&missing, &Request::Decide { seq: 0, value: "x".to_string() });
    assert_eq!(r, None);

    let t = SocketTransport::new(SocketKind::Tcp, Duration::from_millis(200));
    let closed = {
        let l = Listener::bind(SocketKind::Tcp, "127.0.0.1:0").unwrap();
        l.local_address().to_string()
    };
    let r: Option<Reply<String>> = t.send(&closed, &Request::Decide { seq: 0, value: "x".to_string() });
    assert_eq!(r, None);
}

#[test]
fn listener_replaces_stale_socket_and_cleans_up() {
    let dir = TempDir::new("paxos-peer").unwrap();
    let path = dir.path().join("px");
    let addr = path.to_string_lossy().into_owned();

    std::fs::write(&path, b"stale").unwrap();

    let mut l = Listener::bind(SocketKind::Unix, &addr).unwrap();
    let transport: Arc<dyn Transport<String>> =
        Arc::new(SocketTransport::new(SocketKind::Unix, Duration::from_millis(200)));
    let p = Peer::new(vec![addr.clone()], 0, transport);
    let handler: Arc<dyn Handler<String>> = Arc::new(p.clone());
    l.serve(handler.clone(), 1).unwrap();

    assert!(l.serve(handler, 1).is_err());

    l.shutdown();
    assert!(!Path::new(&addr).exists());
}
