//! Connection pooling for a single server.
//!
//! Generalizes the teacher's `PooledStream`/`Pool` design: a bounded set of
//! reusable sockets, reserved exclusively for the duration of one logical
//! request and returned to the pool (or discarded, if poisoned) on drop.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bufstream::BufStream;
use log::debug;

use crate::error::{Error, Result};

/// Default number of concurrently open connections a pool will maintain.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Invoked once per freshly opened TCP connection, before it is handed back
/// to a caller, so that its owner can attach a dedicated reader for that
/// socket's reply stream. Receives an independent handle to the same socket
/// (via `TcpStream::try_clone`) so the reader can block on reads while this
/// `Connection` remains free for the writer side, plus the shared poison flag
/// so the reader can mark the connection broken the moment it sees an I/O
/// error, without needing access to the pooled `Connection` itself.
pub type OnConnect = dyn Fn(TcpStream, Arc<AtomicBool>) + Send + Sync;

/// One TCP connection to the server, buffered for efficient small reads/writes.
pub struct Connection {
    stream: BufStream<TcpStream>,
    poisoned: Arc<AtomicBool>,
}

impl Connection {
    fn connect(host: &str, port: u16, on_connect: &OnConnect) -> Result<Connection> {
        let stream = TcpStream::connect((host, port))?;
        let reader_handle = stream.try_clone()?;
        let poisoned = Arc::new(AtomicBool::new(false));
        on_connect(reader_handle, poisoned.clone());
        Ok(Connection {
            stream: BufStream::new(stream),
            poisoned,
        })
    }

    /// Writes the full byte sequence in one logical, atomic operation. Loops
    /// internally since `Write::write` is permitted to make partial progress;
    /// `write_all` already provides this guarantee for us.
    pub fn write_message(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Marks this connection as broken. The pool will close and discard it
    /// instead of returning it to the idle set.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

struct Inner {
    size: usize,
    len: usize,
    idle: Vec<Connection>,
    iteration: usize,
}

/// A bounded pool of reusable connections to one server.
pub struct ConnectionPool {
    host: String,
    port: u16,
    inner: Mutex<Inner>,
    wait_lock: Condvar,
    live: Arc<AtomicUsize>,
    on_connect: Arc<OnConnect>,
}

/// A move-only lease on one pooled connection. The underlying `Connection` is
/// returned to the pool when this guard is dropped, unless it was poisoned.
pub struct Reservation<'a> {
    connection: Option<Connection>,
    pool: &'a ConnectionPool,
    iteration: usize,
}

impl<'a> Reservation<'a> {
    pub fn connection(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("reservation already released")
    }
}

impl<'a> Drop for Reservation<'a> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection, self.iteration);
        }
    }
}

impl ConnectionPool {
    /// Builds a pool that ignores newly opened sockets (no reader attached).
    /// Mostly useful for tests that only exercise reserve/return semantics.
    pub fn new(host: impl Into<String>, port: u16) -> ConnectionPool {
        ConnectionPool::with_size(host, port, DEFAULT_POOL_SIZE)
    }

    pub fn with_size(host: impl Into<String>, port: u16, size: usize) -> ConnectionPool {
        ConnectionPool::with_size_and_hook(host, port, size, Arc::new(|_, _| {}))
    }

    /// Builds a pool that invokes `on_connect` with an independent read handle
    /// to every newly opened socket, so the caller can attach a reader thread.
    pub fn with_size_and_hook(
        host: impl Into<String>,
        port: u16,
        size: usize,
        on_connect: Arc<OnConnect>,
    ) -> ConnectionPool {
        ConnectionPool {
            host: host.into(),
            port,
            inner: Mutex::new(Inner {
                size,
                len: 0,
                idle: Vec::with_capacity(size),
                iteration: 0,
            }),
            wait_lock: Condvar::new(),
            live: Arc::new(AtomicUsize::new(0)),
            on_connect,
        }
    }

    /// Reserves an idle connection, or opens a new one if under the cap,
    /// blocking until one becomes available (or `deadline` passes).
    pub fn reserve(&self, deadline: Duration) -> Result<Reservation> {
        let started = Instant::now();
        let mut locked = self.inner.lock().expect("connection pool mutex poisoned");

        loop {
            if let Some(connection) = locked.idle.pop() {
                debug!("reserved an idle connection to {}:{}", self.host, self.port);
                return Ok(Reservation {
                    connection: Some(connection),
                    pool: self,
                    iteration: locked.iteration,
                });
            }

            if locked.len < locked.size {
                let connection = Connection::connect(&self.host, self.port, &*self.on_connect)?;
                locked.len += 1;
                self.live.store(locked.len, Ordering::SeqCst);
                debug!("opened a new connection to {}:{}", self.host, self.port);
                return Ok(Reservation {
                    connection: Some(connection),
                    pool: self,
                    iteration: locked.iteration,
                });
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Err(Error::Timeout { request_id: -1 });
            }

            let (guard, timeout_result) = self
                .wait_lock
                .wait_timeout(locked, deadline - elapsed)
                .expect("connection pool condvar poisoned");
            locked = guard;
            if timeout_result.timed_out() && locked.idle.is_empty() && locked.len >= locked.size {
                return Err(Error::Timeout { request_id: -1 });
            }
        }
    }

    fn release(&self, connection: Connection, iteration: usize) {
        let mut locked = self.inner.lock().expect("connection pool mutex poisoned");
        if iteration != locked.iteration {
            // The pool was cleared after this connection was reserved; drop it
            // rather than returning it to a stale generation.
            return;
        }
        if connection.is_poisoned() {
            locked.len = locked.len.saturating_sub(1);
            self.live.store(locked.len, Ordering::SeqCst);
            debug!("discarded a poisoned connection to {}:{}", self.host, self.port);
        } else {
            locked.idle.push(connection);
        }
        self.wait_lock.notify_one();
    }

    /// Closes every idle connection and bumps the pool's generation, so that
    /// connections reserved before the clear are discarded rather than
    /// recycled when they are returned.
    pub fn clear(&self) {
        let mut locked = self.inner.lock().expect("connection pool mutex poisoned");
        locked.idle.clear();
        locked.len = 0;
        locked.iteration += 1;
        self.live.store(0, Ordering::SeqCst);
        self.wait_lock.notify_all();
    }

    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn spawn_echo_server() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn reserve_opens_up_to_the_cap_then_blocks() {
        let (listener, port) = spawn_echo_server();
        thread::spawn(move || {
            for stream in listener.incoming() {
                if stream.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::with_size("127.0.0.1", port, 2);
        let _a = pool.reserve(Duration::from_millis(500)).unwrap();
        let _b = pool.reserve(Duration::from_millis(500)).unwrap();
        assert_eq!(pool.live_connections(), 2);

        let err = pool.reserve(Duration::from_millis(100));
        assert!(err.is_err());
    }

    #[test]
    fn returned_connection_is_reused() {
        let (listener, port) = spawn_echo_server();
        thread::spawn(move || {
            for stream in listener.incoming() {
                if stream.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::with_size("127.0.0.1", port, 1);
        {
            let _a = pool.reserve(Duration::from_millis(500)).unwrap();
        }
        let _b = pool.reserve(Duration::from_millis(500)).unwrap();
        assert_eq!(pool.live_connections(), 1);
    }
}
