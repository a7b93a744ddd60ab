//! Frame based transport over Unix-domain or TCP sockets
//!
//! Every request uses its own connection: the client dials, writes one request frame, reads
//! one reply frame and hangs up. On the receiving side a single accept thread hands new
//! connections to a fixed pool of worker threads.

use std::fs;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};
use rand::Rng;

use crate::encoding::{self, DecodeError};
use crate::messages::{Reply, Request};
use crate::network::{Handler, Transport};
use crate::paxos::protocol_violation;
use crate::value::Value;

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Addresses are filesystem paths
    Unix,
    /// Addresses are `host:port`
    Tcp
}

impl SocketKind {
    pub fn from_name(name: &str) -> Option<SocketKind> {
        match name {
            "unix" => Some(SocketKind::Unix),
            "tcp" => Some(SocketKind::Tcp),
            _ => None
        }
    }
}

enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream)
}

impl Stream {
    fn connect(kind: SocketKind, address: &str, timeout: Duration) -> io::Result<Stream> {
        match kind {
            SocketKind::Unix => Ok(Stream::Unix(UnixStream::connect(address)?)),
            SocketKind::Tcp => {
                let mut last_err = io::Error::new(io::ErrorKind::NotFound,
                    format!("no address for {}", address));
                for addr in address.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(s) => return Ok(Stream::Tcp(s)),
                        Err(e) => last_err = e
                    }
                }
                Err(last_err)
            }
        }
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Stream::Unix(s) => {
                s.set_read_timeout(Some(timeout))?;
                s.set_write_timeout(Some(timeout))
            },
            Stream::Tcp(s) => {
                s.set_read_timeout(Some(timeout))?;
                s.set_write_timeout(Some(timeout))
            }
        }
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.shutdown(how),
            Stream::Tcp(s) => s.shutdown(how)
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf)
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush()
        }
    }
}

/// Dials a fresh connection for every request
pub struct SocketTransport {
    kind: SocketKind,
    rpc_timeout: Duration
}

impl SocketTransport {
    pub fn new(kind: SocketKind, rpc_timeout: Duration) -> SocketTransport {
        SocketTransport { kind, rpc_timeout }
    }

    fn exchange<V: Value>(&self, to: &str, request: &Request<V>) -> io::Result<Reply<V>> {
        let mut stream = match Stream::connect(self.kind, to, self.rpc_timeout) {
            Ok(s) => s,
            Err(e) => {
                match e.kind() {
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => (),
                    _ => warn!("Failed to dial {}: {}", to, e)
                }
                return Err(e);
            }
        };

        stream.set_timeout(self.rpc_timeout)?;

        encoding::write_frame(&mut stream, &encoding::encode_request(request))?;

        let body = encoding::read_frame(&mut stream)?;

        match encoding::decode_reply(&body) {
            Ok(reply) => Ok(reply),
            Err(DecodeError::UnknownKind(k)) => {
                protocol_violation(&format!("unknown reply kind {} from {}", k, to))
            },
            Err(e) => Err(e.into())
        }
    }
}

impl<V: Value> Transport<V> for SocketTransport {
    fn send(&self, to: &str, request: &Request<V>) -> Option<Reply<V>> {
        match self.exchange(to, request) {
            Ok(reply) => Some(reply),
            Err(e) => {
                trace!("{} request to {} failed: {}", request.kind(), to, e);
                None
            }
        }
    }
}

enum RawListener {
    Unix(UnixListener),
    Tcp(TcpListener)
}

impl RawListener {
    fn accept(&self) -> io::Result<Stream> {
        match self {
            RawListener::Unix(l) => l.accept().map(|(s, _)| Stream::Unix(s)),
            RawListener::Tcp(l) => l.accept().map(|(s, _)| Stream::Tcp(s))
        }
    }
}

struct ListenerState {
    unreliable: AtomicBool,
    shutting_down: AtomicBool,
    rpc_count: AtomicUsize
}

pub struct Listener {
    kind: SocketKind,
    address: String,
    io_timeout: Duration,
    raw: Option<RawListener>,
    state: Arc<ListenerState>,
    threads: Vec<JoinHandle<()>>
}

impl Listener {
    /// Binds to `address`. For Unix sockets any file left behind at that path is removed
    /// first. A TCP port of 0 picks a free port, see `local_address`
    pub fn bind(kind: SocketKind, address: &str) -> io::Result<Listener> {
        let (raw, local) = match kind {
            SocketKind::Unix => {
                if Path::new(address).exists() {
                    fs::remove_file(address)?;
                }
                (RawListener::Unix(UnixListener::bind(address)?), address.to_string())
            },
            SocketKind::Tcp => {
                let l = TcpListener::bind(address)?;
                let local = l.local_addr()?.to_string();
                (RawListener::Tcp(l), local)
            }
        };

        debug!("Listening on {}", local);

        Ok(Listener {
            kind,
            address: local,
            io_timeout: DEFAULT_RPC_TIMEOUT,
            raw: Some(raw),
            state: Arc::new(ListenerState {
                unreliable: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                rpc_count: AtomicUsize::new(0)
            }),
            threads: Vec::new()
        })
    }

    pub fn local_address(&self) -> &str {
        &self.address
    }

    /// Bounds the time a worker waits on a slow client
    pub fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    /// Randomly discards 10% of incoming requests and the replies to another 10%
    pub fn set_unreliable(&self, unreliable: bool) {
        self.state.unreliable.store(unreliable, Ordering::SeqCst);
    }

    /// Number of requests handed to the handler so far
    pub fn rpc_count(&self) -> usize {
        self.state.rpc_count.load(Ordering::SeqCst)
    }

    /// Starts the accept thread and `workers` connection handling threads. May only be
    /// called once
    pub fn serve<V: Value>(&mut self, handler: Arc<dyn Handler<V>>, workers: usize) -> io::Result<()> {
        let raw = match self.raw.take() {
            Some(raw) => raw,
            None => return Err(io::Error::new(io::ErrorKind::Other, "listener is already serving"))
        };

        let (sender, receiver) = crossbeam_channel::unbounded::<Stream>();

        for i in 0..workers.max(1) {
            let receiver = receiver.clone();
            let handler = handler.clone();
            let state = self.state.clone();
            let io_timeout = self.io_timeout;

            self.threads.push(thread::Builder::new()
                .name(format!("listener-worker-{}", i))
                .spawn(move || {
                    for stream in receiver.iter() {
                        serve_connection(stream, &*handler, &state, io_timeout);
                    }
                })?);
        }

        let state = self.state.clone();
        let address = self.address.clone();

        self.threads.push(thread::Builder::new()
            .name("listener-accept".to_string())
            .spawn(move || {
                loop {
                    let accepted = raw.accept();

                    if state.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }

                    match accepted {
                        Ok(stream) => {
                            if handler.is_dead() {
                                // Dropping the stream closes the connection
                                continue;
                            }
                            if sender.send(stream).is_err() {
                                break;
                            }
                        },
                        Err(e) => warn!("Accept failed on {}: {}", address, e)
                    }
                }
                trace!("Accept loop for {} exited", address);
            })?);

        info!("Serving {} with {} worker(s)", self.address, workers.max(1));

        Ok(())
    }

    /// Stops accepting connections and waits for all threads to exit
    pub fn shutdown(&mut self) {
        if self.state.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if !self.threads.is_empty() {
            // The accept thread is blocked in accept(). Wake it up
            let _ = Stream::connect(self.kind, &self.address, self.io_timeout);

            for t in self.threads.drain(..) {
                let _ = t.join();
            }
        }

        self.raw = None;

        if self.kind == SocketKind::Unix {
            let _ = fs::remove_file(&self.address);
        }

        debug!("Listener on {} shut down", self.address);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_connection<V: Value>(
    mut stream: Stream,
    handler: &dyn Handler<V>,
    state: &ListenerState,
    io_timeout: Duration) {

    let roll = if state.unreliable.load(Ordering::SeqCst) {
        rand::thread_rng().gen_range(0, 1000)
    } else {
        1000
    };

    if roll < 100 {
        trace!("Discarding request");
        return;
    }

    if let Err(e) = stream.set_timeout(io_timeout) {
        debug!("Failed to set connection timeout: {}", e);
        return;
    }

    let body = match encoding::read_frame(&mut stream) {
        Ok(body) => body,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return;
        }
    };

    let request = match encoding::decode_request::<V>(&body) {
        Ok(request) => request,
        Err(DecodeError::UnknownKind(k)) => protocol_violation(&format!("unknown request kind {}", k)),
        Err(e) => {
            warn!("Discarding undecodable request: {}", e);
            return;
        }
    };

    if handler.is_dead() {
        return;
    }

    state.rpc_count.fetch_add(1, Ordering::SeqCst);

    let reply = handler.handle(request);

    if roll < 200 {
        trace!("Discarding reply");
        let _ = stream.shutdown(Shutdown::Write);
        return;
    }

    if let Err(e) = encoding::write_frame(&mut stream, &encoding::encode_reply(&reply)) {
        debug!("Failed to write reply: {}", e);
    }
}
