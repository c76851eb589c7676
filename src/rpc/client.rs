//! Remote store client.
//!
//! `RemoteStore` offers the `ConcurrentStore` operations over one RPC
//! connection. Every command, waited on or not, goes through a single
//! ordered queue, so the server sees commands in submission order.
//!
//! # Modes
//!
//! In optimized mode `put` and `remove` are fire-and-forget and return
//! `None`; the server skips the previous-value payload. In unoptimized mode
//! they wait and return the previous value. `*_sync` and `*_async` variants
//! pick the behavior explicitly.
//!
//! # Failures
//!
//! A transport or protocol error poisons the session: every later command
//! fails fast with the original diagnostic. A `Failure` status from the
//! server (`RemoteOperation`) leaves the session usable.

use super::codec::ClientCodec;
use super::connection::FramedStream;
use super::message::{Command, Reply, Status, PROTOCOL_VERSION};
use super::queue::{Drained, OrderedQueue, Pending};
use crate::core::codec;
use crate::core::config::ClientConfig;
use crate::core::error::{CabinetError, CabinetResult};
use crate::worker::Worker;
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::Span;

/// Extra wait for a worker thread unblocked by a forced socket shutdown.
const FORCED_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Least time given to the CLOSE reply when the drain used up the budget.
const CLOSE_REPLY_FLOOR: Duration = Duration::from_millis(100);

/// Connection state owned by the queue thread.
struct Session {
    framed: FramedStream<ClientCodec>,
    optimized: bool,
    poisoned: Option<CabinetError>,
}

impl Session {
    /// Send a command and read its replies with `read`, poisoning the
    /// session on transport or protocol failure.
    fn exchange<T>(
        &mut self,
        command: &Command,
        read: impl FnOnce(&mut Self) -> CabinetResult<T>,
    ) -> CabinetResult<T> {
        if let Some(ref poison) = self.poisoned {
            return Err(poison.replay());
        }
        let result = self.framed.send(command).and_then(|_| read(self));
        if let Err(ref e) = result {
            if e.is_connection_fatal() {
                self.poisoned = Some(e.replay());
            }
        }
        result
    }

    fn recv(&mut self) -> CabinetResult<Reply> {
        self.framed
            .recv()?
            .ok_or_else(|| CabinetError::transport("server closed the connection"))
    }

    fn read_status(&mut self) -> CabinetResult<()> {
        match self.recv()? {
            Reply::Status(Status::Success) => Ok(()),
            Reply::Status(Status::Failure(message)) => Err(CabinetError::remote(message)),
            other => Err(CabinetError::protocol(format!(
                "expected Status, got {}",
                other.kind()
            ))),
        }
    }

    /// Read the payload frame, or the failure status that replaces it.
    fn read_payload(&mut self) -> CabinetResult<Reply> {
        match self.recv()? {
            Reply::Status(Status::Failure(message)) => Err(CabinetError::remote(message)),
            Reply::Status(Status::Success) => {
                Err(CabinetError::protocol("status arrived before the payload"))
            }
            Reply::ConnectionOkay { .. } => {
                Err(CabinetError::protocol("unexpected second handshake"))
            }
            payload => Ok(payload),
        }
    }

    fn read_value(&mut self) -> CabinetResult<Option<Vec<u8>>> {
        match self.read_payload()? {
            Reply::Value(value) => {
                self.read_status()?;
                Ok(value)
            }
            other => Err(CabinetError::protocol(format!(
                "expected Value, got {}",
                other.kind()
            ))),
        }
    }

    /// PUT or REMOVE: the previous value only comes back when unoptimized.
    fn write(&mut self, command: Command) -> CabinetResult<Option<Vec<u8>>> {
        self.exchange(&command, |session| {
            if session.optimized {
                session.read_status()?;
                Ok(None)
            } else {
                session.read_value()
            }
        })
    }

    fn get(&mut self, key: Vec<u8>) -> CabinetResult<Option<Vec<u8>>> {
        self.exchange(&Command::Get { key }, Self::read_value)
    }

    fn iterate(&mut self, worker: String, config: Vec<u8>) -> CabinetResult<Vec<u8>> {
        self.exchange(&Command::Iterate { worker, config }, |session| {
            match session.read_payload()? {
                Reply::Worker(bytes) => {
                    session.read_status()?;
                    Ok(bytes)
                }
                other => Err(CabinetError::protocol(format!(
                    "expected Worker, got {}",
                    other.kind()
                ))),
            }
        })
    }

    fn size(&mut self) -> CabinetResult<u64> {
        self.exchange(&Command::Size, |session| match session.read_payload()? {
            Reply::Size(count) => {
                session.read_status()?;
                u64::try_from(count)
                    .map_err(|_| CabinetError::protocol(format!("negative size {}", count)))
            }
            other => Err(CabinetError::protocol(format!(
                "expected Size, got {}",
                other.kind()
            ))),
        })
    }

    fn clear(&mut self) -> CabinetResult<()> {
        self.exchange(&Command::Clear, Self::read_status)
    }

    fn set_optimize(&mut self, optimize: bool) -> CabinetResult<()> {
        self.exchange(&Command::SetOptimize { optimize }, Self::read_status)?;
        self.optimized = optimize;
        Ok(())
    }

    fn close(&mut self) -> CabinetResult<()> {
        let result = self.exchange(&Command::Close, Self::read_status);
        self.framed.shutdown();
        result
    }
}

/// Client stub for a store served by `rpc::Server`.
pub struct RemoteStore {
    peer: SocketAddr,
    queue: OrderedQueue<Session>,
    /// Second handle on the socket, used to force a stuck queue out.
    socket: Mutex<Option<TcpStream>>,
    optimized: AtomicBool,
    closed: AtomicBool,
    config: ClientConfig,
    span: Span,
}

impl RemoteStore {
    /// Connect and complete the handshake.
    ///
    /// Fails with `HandshakeMismatch` when the server offers a different
    /// mode than `config.optimize`, and with `ProtocolViolation` when it
    /// speaks another protocol version.
    pub fn connect(addr: &str, config: ClientConfig) -> CabinetResult<Self> {
        Self::connect_with_span(addr, config, Span::none())
    }

    pub fn connect_with_span(addr: &str, config: ClientConfig, span: Span) -> CabinetResult<Self> {
        let stream = open_stream(addr, config.connect_timeout())?;
        let peer = stream.peer_addr().map_err(|e| CabinetError::ConnectFailed {
            addr: addr.to_string(),
            source: e,
        })?;
        let _ = stream.set_nodelay(true);

        let mut framed = FramedStream::new(stream, ClientCodec::new(config.max_frame_bytes));
        framed.set_read_timeout(config.connect_timeout())?;
        let handshake = match framed.recv() {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                return Err(CabinetError::ConnectFailed {
                    addr: addr.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionAborted,
                        "server closed the connection before the handshake",
                    ),
                })
            }
            Err(e) => return Err(e),
        };
        framed.set_read_timeout(None)?;

        match handshake {
            Reply::ConnectionOkay { version, .. } if version != PROTOCOL_VERSION => {
                framed.shutdown();
                return Err(CabinetError::protocol(format!(
                    "server speaks protocol version {}, expected {}",
                    version, PROTOCOL_VERSION
                )));
            }
            Reply::ConnectionOkay { optimized, .. } if optimized != config.optimize => {
                framed.shutdown();
                return Err(CabinetError::HandshakeMismatch {
                    expected_optimized: config.optimize,
                    offered_optimized: optimized,
                });
            }
            Reply::ConnectionOkay { .. } => {}
            other => {
                framed.shutdown();
                return Err(CabinetError::protocol(format!(
                    "expected ConnectionOkay, got {}",
                    other.kind()
                )));
            }
        }

        let socket = framed.try_clone_stream()?;
        let session = Session {
            framed,
            optimized: config.optimize,
            poisoned: None,
        };
        let queue = OrderedQueue::start("cabinet-client", session, span.clone())?;

        tracing::info!(parent: &span, peer = %peer, optimized = config.optimize, "connected to remote store");

        Ok(Self {
            peer,
            queue,
            socket: Mutex::new(Some(socket)),
            optimized: AtomicBool::new(config.optimize),
            closed: AtomicBool::new(false),
            config,
            span,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Current connection mode.
    pub fn optimized(&self) -> bool {
        self.optimized.load(Ordering::SeqCst)
    }

    fn submit<T, F>(&self, operation: &'static str, f: F) -> CabinetResult<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> CabinetResult<T> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CabinetError::Closed);
        }
        Ok(self
            .queue
            .submit(operation, f)?
            .with_timeout(self.config.request_timeout()))
    }

    /// Mode-dependent put: fire-and-forget returning `None` when optimized,
    /// waiting for the previous value otherwise.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        if self.optimized() {
            drop(self.put_async(key, value)?);
            Ok(None)
        } else {
            self.put_sync(key, value)
        }
    }

    /// Enqueue a put. Drop the handle to not wait at all.
    pub fn put_async(&self, key: &[u8], value: &[u8]) -> CabinetResult<Pending<Option<Vec<u8>>>> {
        let command = Command::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.submit("PUT", move |session| session.write(command))
    }

    /// Put and wait. Returns the previous value in unoptimized mode.
    pub fn put_sync(&self, key: &[u8], value: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        self.put_async(key, value)?.wait()
    }

    /// Mode-dependent remove, like `put`.
    pub fn remove(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        if self.optimized() {
            drop(self.remove_async(key)?);
            Ok(None)
        } else {
            self.remove_sync(key)
        }
    }

    pub fn remove_async(&self, key: &[u8]) -> CabinetResult<Pending<Option<Vec<u8>>>> {
        let command = Command::Remove { key: key.to_vec() };
        self.submit("REMOVE", move |session| session.write(command))
    }

    pub fn remove_sync(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        self.remove_async(key)?.wait()
    }

    pub fn get(&self, key: &[u8]) -> CabinetResult<Option<Vec<u8>>> {
        self.get_async(key)?.wait()
    }

    pub fn get_async(&self, key: &[u8]) -> CabinetResult<Pending<Option<Vec<u8>>>> {
        let key = key.to_vec();
        self.submit("GET", move |session| session.get(key))
    }

    /// Run `W` on the server and return the finished worker.
    pub fn iterate<W: Worker>(&self, config: &W::Config) -> CabinetResult<W> {
        self.iterate_async::<W>(config)?.wait()
    }

    pub fn iterate_async<W: Worker>(&self, config: &W::Config) -> CabinetResult<Pending<W>> {
        let config = codec::encode(config)?;
        self.submit("ITERATE", move |session| {
            let bytes = session.iterate(W::TAG.to_string(), config)?;
            codec::decode::<W>(&bytes)
        })
    }

    pub fn size(&self) -> CabinetResult<u64> {
        self.size_async()?.wait()
    }

    pub fn size_async(&self) -> CabinetResult<Pending<u64>> {
        self.submit("SIZE", Session::size)
    }

    pub fn clear(&self) -> CabinetResult<()> {
        self.clear_async()?.wait()
    }

    pub fn clear_async(&self) -> CabinetResult<Pending<()>> {
        self.submit("CLEAR", Session::clear)
    }

    /// Switch the connection mode. Waits for every earlier command.
    pub fn set_optimize(&self, optimize: bool) -> CabinetResult<()> {
        self.submit("SET_OPTIMIZE", move |session| session.set_optimize(optimize))?
            .wait()?;
        self.optimized.store(optimize, Ordering::SeqCst);
        tracing::debug!(parent: &self.span, optimize, "connection mode changed");
        Ok(())
    }

    /// Drain queued commands, end the session and release the socket.
    ///
    /// Commands still queued when the drain timeout expires are cancelled;
    /// their waiters receive `Cancelled`. Calling close again is a no-op.
    pub fn close(&self) -> CabinetResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let timeout = self.config.drain_timeout();
        let started = Instant::now();
        let result = match self.queue.shutdown(timeout) {
            Drained::Completed(mut session) => {
                // A peer that never answers CLOSE must not hold us past the budget.
                let budget = timeout
                    .saturating_sub(started.elapsed())
                    .max(CLOSE_REPLY_FLOOR);
                let result = session
                    .framed
                    .set_read_timeout(Some(budget))
                    .and_then(|_| session.close());
                if let Err(ref e) = result {
                    tracing::warn!(parent: &self.span, peer = %self.peer, error = %e, "CLOSE was not acknowledged");
                }
                result
            }
            Drained::TimedOut(straggler) => {
                tracing::warn!(
                    parent: &self.span,
                    peer = %self.peer,
                    timeout_ms = timeout.as_millis() as u64,
                    "drain timed out, cancelling queued commands"
                );
                self.kill_socket();
                if straggler.wait(FORCED_CLOSE_GRACE).is_none() {
                    tracing::warn!(parent: &self.span, "command queue did not stop after socket shutdown");
                }
                Ok(())
            }
            Drained::Gone => Ok(()),
        };

        self.kill_socket();
        tracing::info!(parent: &self.span, peer = %self.peer, "remote store closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn kill_socket(&self) {
        if let Some(socket) = self.socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(parent: &self.span, peer = %self.peer, error = %e, "error while closing remote store");
        }
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("peer", &self.peer)
            .field("optimized", &self.optimized())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn open_stream(addr: &str, timeout: Option<Duration>) -> CabinetResult<TcpStream> {
    let connect_failed = |source: std::io::Error| CabinetError::ConnectFailed {
        addr: addr.to_string(),
        source,
    };

    let Some(timeout) = timeout else {
        return TcpStream::connect(addr).map_err(connect_failed);
    };

    let mut last_error = None;
    for candidate in addr.to_socket_addrs().map_err(connect_failed)? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(connect_failed(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        )
    })))
}
