//! livestatusd - query execution daemon.
//!
//! Binds a small in-process table registry (the mock `hosts`/`services`
//! fixtures `livestatus-core` ships for its own tests) to a TCP socket and
//! answers one query per connection, matching the protocol's request/
//! response framing.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use livestatus_core::executor::{self, DEFAULT_MAX_RESPONSE_SIZE};
use livestatus_core::mock::MockTable;
use livestatus_core::render::OutputFormat;
use livestatus_core::request::{self, ResponseHeaderMode};
use livestatus_core::table::{Table, TableRegistry};
use livestatus_core::wait::TriggerRegistry;

/// Query execution daemon.
#[derive(Parser)]
#[command(name = "livestatusd", about = "Query execution daemon", version)]
struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:6557")]
    bind: String,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// The fixed set of tables this daemon exposes. A real deployment would
/// bind `Table` implementations backed by a live monitoring core; here it's
/// the same fixtures the core crate's own tests run against.
struct Registry {
    hosts: MockTable,
}

impl Registry {
    fn new() -> Self {
        Registry {
            hosts: MockTable::typical_hosts(),
        }
    }
}

impl TableRegistry for Registry {
    fn table(&self, name: &str) -> Option<&dyn Table> {
        match name {
            "hosts" => Some(&self.hosts),
            _ => None,
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("livestatusd={}", level).parse().unwrap())
        .add_directive(format!("livestatus_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("livestatusd {} starting", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(Registry::new());
    let triggers = TriggerRegistry::new();

    let listener = match TcpListener::bind(&args.bind) {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {}: {}", args.bind, e);
            std::process::exit(1);
        }
    };
    info!("listening on {}", args.bind);

    let running = Arc::new(AtomicBool::new(true));
    let shutdown_flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        shutdown_flag.store(false, Ordering::SeqCst);
        std::process::exit(0);
    }) {
        warn!("failed to set Ctrl-C handler: {}", e);
    }

    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let registry = registry.clone();
                let triggers = triggers.clone();
                std::thread::spawn(move || handle_connection(stream, &*registry, &triggers));
            }
            Err(e) => {
                warn!("accept failed: {}", e);
            }
        }
    }

    info!("shutdown complete");
}

/// Reads and answers requests off one connection until the peer closes it
/// or a read/write fails. A request with `KeepAlive: on` keeps the loop
/// going; otherwise the connection is answered once and closed.
fn handle_connection(stream: TcpStream, registry: &dyn TableRegistry, triggers: &TriggerRegistry) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let span = tracing::debug_span!("connection", peer = %peer);
    let _guard = span.enter();
    debug!("connection opened");

    let mut reader = BufReader::new(stream.try_clone().expect("clone tcp stream"));
    let mut writer = stream;

    loop {
        let request_text = match read_request(&mut reader) {
            Ok(Some(text)) => text,
            Ok(None) => break, // peer closed the connection
            Err(e) => {
                warn!("read error: {}", e);
                break;
            }
        };
        if request_text.trim().is_empty() {
            break;
        }

        let keepalive = match request::parse(&request_text, registry) {
            Ok(query) => {
                let keepalive = query.keepalive;
                let table = table_for(registry, &request_text);
                let result = executor::execute(query, table, triggers, DEFAULT_MAX_RESPONSE_SIZE);
                if let Err(e) = writer.write_all(&result.body) {
                    warn!("write error: {}", e);
                    break;
                }
                keepalive
            }
            Err(err) => {
                warn!("invalid request: {}", err);
                let body = executor::render_error(&err, OutputFormat::Csv, ResponseHeaderMode::Off);
                if let Err(e) = writer.write_all(&body) {
                    warn!("write error: {}", e);
                }
                false
            }
        };

        if !keepalive {
            break;
        }
    }

    debug!("connection closed");
}

/// Re-resolves the table a request named, purely so `execute` gets a
/// `&dyn Table` with the registry's own lifetime rather than the `Query`'s
/// borrowed one. Parsing already validated the table exists.
fn table_for<'a>(registry: &'a dyn TableRegistry, request_text: &str) -> &'a dyn Table {
    let table_name = request_text
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("GET "))
        .map(str::trim)
        .unwrap_or("");
    registry.table(table_name).expect("table validated during parse")
}

/// Reads header lines up to and including the blank line that ends a
/// request. Returns `Ok(None)` if the peer closed before sending anything.
/// Generic over `BufRead` so it can be exercised against an in-memory
/// cursor in tests without opening a real socket.
fn read_request(reader: &mut impl BufRead) -> std::io::Result<Option<String>> {
    let mut text = String::new();
    let mut line = String::new();
    let mut saw_any = false;
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(if saw_any { Some(text) } else { None });
        }
        saw_any = true;
        if line == "\n" || line == "\r\n" {
            text.push('\n');
            break;
        }
        text.push_str(&line);
    }
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_request_stops_at_blank_line() {
        let mut cursor = Cursor::new(b"GET hosts\nColumns: host\n\nGET hosts\n\n".to_vec());
        let first = read_request(&mut cursor).unwrap().unwrap();
        assert_eq!(first, "GET hosts\nColumns: host\n\n");
        let second = read_request(&mut cursor).unwrap().unwrap();
        assert_eq!(second, "GET hosts\n\n");
    }

    #[test]
    fn read_request_returns_none_on_immediate_eof() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_request(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn registry_resolves_known_table_only() {
        let registry = Registry::new();
        assert!(registry.table("hosts").is_some());
        assert!(registry.table("services").is_none());
    }
}
