use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;

use clap::{App, Arg};
use log::{error, info};

use paxos_peer::config::Config;
use paxos_peer::network::socket::{Listener, SocketTransport};
use paxos_peer::{Handler, Peer, Seq, Status, Transport};

fn parse_seq(arg: Option<&str>) -> Result<Seq, String> {
    match arg {
        None => Err("missing sequence number".to_string()),
        Some(s) => s.parse::<Seq>().map_err(|e| format!("bad sequence number {}: {}", s, e))
    }
}

/// Returns false once the peer has been killed
fn execute(peer: &Peer<String>, line: &str, out: &mut dyn Write) -> io::Result<bool> {
    let mut words = line.split_whitespace();

    let command = match words.next() {
        Some(c) => c,
        None => return Ok(true)
    };

    let result = match command {
        "start" => parse_seq(words.next()).and_then(|seq| {
            let value = words.collect::<Vec<&str>>().join(" ");
            if value.is_empty() {
                Err("missing value".to_string())
            } else {
                peer.start(seq, value);
                Ok("ok".to_string())
            }
        }),
        "status" => parse_seq(words.next()).map(|seq| match peer.status(seq) {
            Status::Decided(v) => format!("decided {}", v),
            Status::Pending => "pending".to_string(),
            Status::Forgotten => "forgotten".to_string()
        }),
        "done" => parse_seq(words.next()).map(|seq| {
            peer.done(seq);
            "ok".to_string()
        }),
        "max" => Ok(peer.max().to_string()),
        "min" => Ok(peer.min().to_string()),
        "kill" => {
            peer.kill();
            writeln!(out, "ok")?;
            return Ok(false);
        },
        _ => Err(format!("unknown command {}", command))
    };

    match result {
        Ok(s) => writeln!(out, "{}", s)?,
        Err(e) => writeln!(out, "error: {}", e)?
    }

    Ok(true)
}

fn main() {
    env_logger::init();

    let matches = App::new("paxos-peer")
        .version("0.1.0")
        .about("Paxos agreement peer driven by line commands on stdin")
        .arg(Arg::with_name("config")
            .long("config")
            .short("c")
            .takes_value(true)
            .required(true)
            .help("TOML configuration file"))
        .arg(Arg::with_name("me")
            .long("me")
            .takes_value(true)
            .help("Overrides the configured peer index"))
        .arg(Arg::with_name("unreliable")
            .long("unreliable")
            .help("Randomly drop incoming requests and replies"))
        .get_matches();

    let mut config = match matches.value_of("config").map(|path| Config::load(path)) {
        Some(Ok(c)) => c,
        Some(Err(e)) => {
            eprintln!("{}", e);
            process::exit(1);
        },
        None => process::exit(1)
    };

    if let Some(me) = matches.value_of("me") {
        config.me = match me.parse() {
            Ok(me) => me,
            Err(e) => {
                eprintln!("Invalid --me {}: {}", me, e);
                process::exit(1);
            }
        };
    }

    if matches.is_present("unreliable") {
        config.unreliable = true;
    }

    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        process::exit(1);
    }

    let transport: Arc<dyn Transport<String>> = Arc::new(SocketTransport::new(config.network, config.rpc_timeout));
    let peer: Peer<String> = Peer::with_options(config.peers.clone(), config.me, transport,
        config.options());

    let mut listener = match Listener::bind(config.network, &config.peers[config.me]) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", config.peers[config.me], e);
            process::exit(1);
        }
    };

    listener.set_io_timeout(config.rpc_timeout);
    listener.set_unreliable(config.unreliable);

    let handler: Arc<dyn Handler<String>> = Arc::new(peer.clone());

    if let Err(e) = listener.serve(handler, config.workers) {
        error!("Failed to start listener: {}", e);
        process::exit(1);
    }

    info!("Peer {} of {} listening on {}", config.me, config.peers.len(), listener.local_address());

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match execute(&peer, &line, &mut out) {
            Ok(true) => (),
            Ok(false) => break,
            Err(e) => {
                error!("Failed to write to stdout: {}", e);
                break;
            }
        }
    }

    peer.kill();
    listener.shutdown();

    info!("Peer {} handled {} request(s)", config.me, listener.rpc_count());
}
