//! `Server` represents one logical peer: it owns the connection pool, the
//! dedicated reader task that demultiplexes replies by `response_to`, and the
//! monotonic request-id counter.

use std::collections::{HashMap, VecDeque};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bson::{Bson, Document};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, OnConnect};
use crate::wire_protocol::header::Header;
use crate::wire_protocol::operations::{Message, Reply};

/// Default time a caller will wait for a reply before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the reaper wakes to sweep unclaimed inbox entries.
const REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// Multiplier applied to the largest observed timeout to decide how old an
/// orphaned reply may get before the reaper discards it (spec.md §5, §9).
const REAPER_WATERMARK_MULTIPLIER: u32 = 5;

type Callback = Box<dyn FnMut(Reply) + Send>;

struct Shared {
    inbox: Mutex<VecDeque<(i32, Reply, Instant)>>,
    waiters: Mutex<HashMap<i32, Arc<Condvar>>>,
    callbacks: Mutex<HashMap<i32, Callback>>,
    connected: std::sync::atomic::AtomicBool,
    max_observed_timeout_ms: AtomicU64,
}

/// One logical connection to a document-database peer.
///
/// Owns a [`ConnectionPool`] whose every freshly opened socket gets its own
/// dedicated reader thread (the sole reader of that socket's reply bytes),
/// plus the bookkeeping used to correlate replies back to the caller that
/// sent the matching request. All per-connection readers funnel into the
/// same [`Shared`] inbox, so from a caller's perspective the server behaves
/// as one logical demultiplexer regardless of how many sockets are open.
pub struct Server {
    pool: Arc<ConnectionPool>,
    shared: Arc<Shared>,
    next_request_id: AtomicI32,
    max_wire_version: AtomicI32,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Connects to `host:port` and spawns the reaper task.
    pub fn connect(host: impl Into<String>, port: u16) -> Result<Server> {
        Server::connect_with_pool_size(host, port, crate::pool::DEFAULT_POOL_SIZE)
    }

    pub fn connect_with_pool_size(
        host: impl Into<String>,
        port: u16,
        pool_size: usize,
    ) -> Result<Server> {
        let host = host.into();

        let shared = Arc::new(Shared {
            inbox: Mutex::new(VecDeque::new()),
            waiters: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            connected: std::sync::atomic::AtomicBool::new(true),
            max_observed_timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT.as_millis() as u64),
        });

        let on_connect = reader_spawning_hook(shared.clone());
        let pool = Arc::new(ConnectionPool::with_size_and_hook(
            host.clone(),
            port,
            pool_size,
            on_connect,
        ));

        // Establish one connection up front so that connection failures
        // surface from `connect()` itself rather than from the first command.
        // This also spawns that connection's reader thread via the hook.
        drop(pool.reserve(Duration::from_secs(10))?);

        let server = Server {
            pool,
            shared,
            next_request_id: AtomicI32::new(0),
            max_wire_version: AtomicI32::new(0),
            reaper: Mutex::new(None),
        };

        server.spawn_reaper();
        Ok(server)
    }

    fn spawn_reaper(&self) {
        let shared = self.shared.clone();
        let handle = thread::spawn(move || loop {
            thread::sleep(REAPER_INTERVAL);
            if !shared.connected.load(Ordering::SeqCst) {
                return;
            }
            let observed_ms = shared.max_observed_timeout_ms.load(Ordering::SeqCst);
            let watermark_ms = observed_ms.saturating_mul(u64::from(REAPER_WATERMARK_MULTIPLIER));
            reap_orphans(&shared, Duration::from_millis(watermark_ms));
        });
        *self.reaper.lock().unwrap() = Some(handle);
    }

    /// Returns a unique, strictly increasing request id for this server's
    /// lifetime (spec.md §8 property 2).
    pub fn next_message_id(&self) -> i32 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version.load(Ordering::SeqCst)
    }

    /// Updates the cached handshake data. Called by the database layer when
    /// it observes a reply shaped like an `isMaster`/hello response.
    pub fn note_max_wire_version(&self, version: i32) {
        self.max_wire_version.store(version, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Inspects a command reply for an `isMaster`/`hello`-shaped
    /// `maxWireVersion` field and, if present, updates the cached handshake
    /// data. `Database::run_command` is the only caller with enough context
    /// to recognize this shape, since it sees every command reply.
    pub fn note_handshake(&self, doc: &Document) {
        let version = match doc.get("maxWireVersion") {
            Some(&Bson::I32(v)) => Some(v),
            Some(&Bson::I64(v)) => Some(v as i32),
            _ => None,
        };
        if let Some(v) = version {
            self.note_max_wire_version(v);
        }
    }

    /// Writes `message` over a freshly reserved connection and returns its
    /// request id.
    pub fn send(&self, message: &Message, deadline: Duration) -> Result<i32> {
        if !self.is_connected() {
            return Err(Error::NotYetConnected);
        }
        let bytes = message.encode()?;
        let mut reservation = self.pool.reserve(deadline)?;
        let write_result = reservation.connection().write_message(&bytes);
        if write_result.is_err() {
            reservation.connection().poison();
            self.shared.connected.store(false, Ordering::SeqCst);
        }
        write_result?;
        Ok(message.header().request_id)
    }

    /// Registers a waiter for `request_id`, then blocks up to `timeout`
    /// waiting for the matching reply to land in the inbox.
    pub fn await_response(&self, request_id: i32, timeout: Duration) -> Result<Reply> {
        self.shared
            .max_observed_timeout_ms
            .fetch_max(timeout.as_millis() as u64, Ordering::SeqCst);

        let condvar = Arc::new(Condvar::new());
        {
            let mut waiters = self.shared.waiters.lock().unwrap();
            waiters.insert(request_id, condvar.clone());
        }

        let mut inbox = self.shared.inbox.lock().unwrap();
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(pos) = inbox.iter().position(|(id, _, _)| *id == request_id) {
                let (_, reply, _) = inbox.remove(pos).unwrap();
                self.shared.waiters.lock().unwrap().remove(&request_id);
                return Ok(reply);
            }

            let now = Instant::now();
            if now >= deadline {
                self.shared.waiters.lock().unwrap().remove(&request_id);
                return Err(Error::Timeout { request_id });
            }

            let (guard, timeout_result) = condvar
                .wait_timeout(inbox, deadline - now)
                .expect("inbox mutex poisoned");
            inbox = guard;

            if timeout_result.timed_out() {
                // Spurious or real timeout: loop around and re-check the
                // inbox once more before giving up, since a reply may have
                // been enqueued in the same instant the wait expired.
                if !inbox.iter().any(|(id, _, _)| *id == request_id) && Instant::now() >= deadline {
                    self.shared.waiters.lock().unwrap().remove(&request_id);
                    return Err(Error::Timeout { request_id });
                }
            }
        }
    }

    /// Registers a callback to be invoked (on the reader thread, so it must
    /// not block) when the reply to `request_id` arrives, instead of using
    /// the condvar wakeup path.
    pub fn on_response(&self, request_id: i32, callback: Callback) {
        self.shared.callbacks.lock().unwrap().insert(request_id, callback);
    }

    /// `send` followed by `await_response` with a default timeout.
    pub fn send_and_await(&self, message: &Message, timeout: Duration) -> Result<Reply> {
        let request_id = self.send(message, timeout)?;
        self.await_response(request_id, timeout)
    }

    /// Closes the underlying connection pool. The reader's next read fails,
    /// it observes `connected = false`, and exits; in-flight waiters time out
    /// on their own deadlines.
    pub fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.pool.clear();
    }
}

/// Builds the hook passed to [`ConnectionPool::with_size_and_hook`]: for every
/// freshly opened socket, spawns a dedicated reader thread that feeds decoded
/// replies into `shared`.
fn reader_spawning_hook(shared: Arc<Shared>) -> Arc<OnConnect> {
    Arc::new(move |stream: TcpStream, poisoned: Arc<AtomicBool>| {
        let shared = shared.clone();
        let result = thread::Builder::new()
            .name("docwire-reader".to_owned())
            .spawn(move || reader_loop(&shared, stream, &poisoned));
        if let Err(err) = result {
            warn!("failed to spawn reader thread: {}", err);
        }
    })
}

fn reader_loop(shared: &Arc<Shared>, mut stream: TcpStream, poisoned: &Arc<AtomicBool>) {
    use std::io::Read;

    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        if !shared.connected.load(Ordering::SeqCst) {
            return;
        }

        match stream.read(&mut chunk) {
            Ok(0) => {
                debug!("reader observed EOF; marking server disconnected");
                shared.connected.store(false, Ordering::SeqCst);
                return;
            }
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(err) => {
                warn!("reader I/O error: {}", err);
                poisoned.store(true, Ordering::SeqCst);
                shared.connected.store(false, Ordering::SeqCst);
                return;
            }
        }

        loop {
            if buffer.len() < 16 {
                break;
            }

            let length = match Header::peek_length(&buffer) {
                Ok(l) => l as usize,
                Err(err) => {
                    warn!("reader failed to parse a frame length: {}", err);
                    shared.connected.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if length > buffer.len() {
                break;
            }

            let frame: Vec<u8> = buffer.drain(0..length).collect();

            let response_to = match Header::peek_response_to(&frame) {
                Ok(id) => id,
                Err(err) => {
                    warn!("reader failed to read response_to: {}", err);
                    continue;
                }
            };

            let message = match Message::decode(&frame) {
                Ok(m) => m,
                Err(err) => {
                    warn!("reader failed to decode a frame: {}", err);
                    continue;
                }
            };

            let reply = match message {
                Message::OpReply { reply, .. } => reply,
                _ => {
                    warn!("reader received a non-reply opcode from the server");
                    continue;
                }
            };

            {
                let mut inbox = shared.inbox.lock().unwrap();
                inbox.push_back((response_to, reply.clone(), Instant::now()));
            }

            if let Some(condvar) = shared.waiters.lock().unwrap().get(&response_to) {
                condvar.notify_all();
            }

            if let Some(callback) = shared.callbacks.lock().unwrap().get_mut(&response_to) {
                callback(reply);
            }
        }
    }
}

fn reap_orphans(shared: &Arc<Shared>, watermark: Duration) {
    let mut inbox = shared.inbox.lock().unwrap();
    let before = inbox.len();
    let waiters = shared.waiters.lock().unwrap();
    let now = Instant::now();
    inbox.retain(|(id, _, received_at)| {
        waiters.contains_key(id) || now.duration_since(*received_at) < watermark
    });
    let reaped = before - inbox.len();
    if reaped > 0 {
        debug!("reaper discarded {} orphaned replies", reaped);
    }
}
