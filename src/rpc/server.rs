//! RPC server.
//!
//! One accept thread hands every admitted connection to its own handler
//! thread. A handler owns its connection exclusively and applies commands to
//! the shared store in arrival order.
//!
//! Per connection:
//!
//! 1. Ask the access predicate about the peer IP. Rejected: close silently.
//! 2. Send `ConnectionOkay { version, optimized }`.
//! 3. Loop: read a command, execute it, reply with payload and status.
//!    A failing command replies `Failure` and the loop continues. A frame
//!    that cannot be decoded ends this connection only.

use super::codec::ServerCodec;
use super::connection::FramedStream;
use super::message::{Command, Reply, Status, PROTOCOL_VERSION};
use crate::core::config::ServerConfig;
use crate::core::error::{CabinetError, CabinetResult};
use crate::net::access::{self, AccessControl};
use crate::storage::ConcurrentStore;
use crate::worker::WorkerRegistry;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::Span;

/// Connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Server counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    connections_rejected: AtomicU64,
    commands_processed: AtomicU64,
    commands_failed: AtomicU64,
}

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerMetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub commands_processed: u64,
    pub commands_failed: u64,
}

impl ServerMetrics {
    fn snapshot(&self) -> ServerMetricsSnapshot {
        ServerMetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active connection gauge when the handler exits.
struct ActiveConnection(Arc<ServerMetrics>);

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.connections_active.fetch_sub(1, Ordering::Relaxed);
    }
}

struct Shared {
    store: Arc<ConcurrentStore>,
    access: Arc<dyn AccessControl>,
    registry: WorkerRegistry,
    metrics: Arc<ServerMetrics>,
    optimize: bool,
    max_frame_bytes: usize,
    span: Span,
}

/// Server builder.
pub struct Server {
    store: Arc<ConcurrentStore>,
    config: ServerConfig,
    access: Arc<dyn AccessControl>,
    registry: WorkerRegistry,
    span: Span,
}

impl Server {
    /// Serve `store` with the access predicate described by `config`.
    pub fn new(store: Arc<ConcurrentStore>, config: ServerConfig) -> Self {
        let access = access::from_config(&config);
        Self {
            store,
            config,
            access,
            registry: WorkerRegistry::with_builtin(),
            span: Span::none(),
        }
    }

    pub fn with_access_control(mut self, access: impl AccessControl + 'static) -> Self {
        self.access = Arc::new(access);
        self
    }

    /// Workers runnable through ITERATE. Defaults to the built-in set.
    pub fn with_registry(mut self, registry: WorkerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Bind and start accepting connections.
    pub fn start(self) -> CabinetResult<ServerHandle> {
        let listener = TcpListener::bind(&self.config.bind).map_err(|e| {
            CabinetError::configuration(format!("failed to bind {}: {}", self.config.bind, e))
        })?;
        let local_addr = listener.local_addr()?;

        let metrics = Arc::new(ServerMetrics::default());
        let stopping = Arc::new(AtomicBool::new(false));
        let span = self.span;
        let optimize = self.config.optimize;
        let shared = Arc::new(Shared {
            store: self.store,
            access: self.access,
            registry: self.registry,
            metrics: Arc::clone(&metrics),
            optimize,
            max_frame_bytes: self.config.max_frame_bytes,
            span: span.clone(),
        });

        let accept_stopping = Arc::clone(&stopping);
        let accept_thread = thread::Builder::new()
            .name("cabinet-accept".to_string())
            .spawn(move || accept_loop(listener, shared, accept_stopping))
            .map_err(|e| CabinetError::transport(format!("failed to start accept loop: {}", e)))?;

        tracing::info!(
            parent: &span,
            bind = %local_addr,
            optimize,
            "server listening"
        );

        Ok(ServerHandle {
            local_addr,
            stopping,
            metrics,
            accept_thread: Some(accept_thread),
            span,
        })
    }
}

/// Running server. Dropping it stops the accept loop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    metrics: Arc<ServerMetrics>,
    accept_thread: Option<JoinHandle<()>>,
    span: Span,
}

impl ServerHandle {
    /// Bound address, with the real port when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> ServerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting connections. Established connections run until their
    /// clients leave. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        let Some(accept_thread) = self.accept_thread.take() else {
            return;
        };
        self.stopping.store(true, Ordering::SeqCst);

        // Unblock accept() with a throwaway connection.
        let _ = TcpStream::connect_timeout(&wake_addr(self.local_addr), Duration::from_secs(1));
        if accept_thread.join().is_err() {
            tracing::warn!(parent: &self.span, "accept loop panicked");
        }
        tracing::info!(parent: &self.span, bind = %self.local_addr, "server stopped");
    }

    /// Block until the accept loop exits.
    pub fn join(mut self) {
        if let Some(accept_thread) = self.accept_thread.take() {
            let _ = accept_thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wake_addr(local_addr: SocketAddr) -> SocketAddr {
    let ip = match local_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local_addr.port())
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, stopping: Arc<AtomicBool>) {
    let mut next_id = 0u64;
    for incoming in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(parent: &shared.span, error = %e, "accept failed");
                continue;
            }
        };
        next_id += 1;
        admit(&shared, stream, ConnectionId(next_id));
    }
}

fn admit(shared: &Arc<Shared>, stream: TcpStream, id: ConnectionId) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            tracing::debug!(parent: &shared.span, conn = %id, error = %e, "peer vanished before admission");
            return;
        }
    };

    let source = peer.ip().to_string();
    if !shared.access.allow(&source) {
        shared.metrics.connections_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::info!(parent: &shared.span, conn = %id, source = %source, "connection rejected");
        return;
    }

    shared.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
    shared.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    let active = ActiveConnection(Arc::clone(&shared.metrics));

    let span = tracing::info_span!(parent: &shared.span, "connection", conn = %id, peer = %peer);
    let _ = stream.set_nodelay(true);
    let handler = ConnectionHandler {
        framed: FramedStream::new(stream, ServerCodec::new(shared.max_frame_bytes)),
        optimized: shared.optimize,
        shared: Arc::clone(shared),
        span,
    };

    let spawned = thread::Builder::new()
        .name(format!("cabinet-{}", id))
        .spawn(move || {
            let _active = active;
            handler.run();
        });
    if let Err(e) = spawned {
        tracing::error!(parent: &shared.span, conn = %id, error = %e, "failed to spawn connection handler");
    }
}

struct ConnectionHandler {
    framed: FramedStream<ServerCodec>,
    optimized: bool,
    shared: Arc<Shared>,
    span: Span,
}

impl ConnectionHandler {
    fn run(mut self) {
        let handshake = Reply::ConnectionOkay {
            version: PROTOCOL_VERSION,
            optimized: self.optimized,
        };
        if let Err(e) = self.framed.send(&handshake) {
            tracing::debug!(parent: &self.span, error = %e, "handshake failed");
            return;
        }
        tracing::debug!(parent: &self.span, optimized = self.optimized, "connection established");

        loop {
            let command = match self.framed.recv() {
                Ok(Some(command)) => command,
                Ok(None) => {
                    tracing::debug!(parent: &self.span, "peer disconnected");
                    break;
                }
                Err(e @ CabinetError::ProtocolViolation { .. }) => {
                    tracing::warn!(parent: &self.span, error = %e, "malformed frame, closing connection");
                    break;
                }
                Err(e) => {
                    tracing::debug!(parent: &self.span, error = %e, "connection lost");
                    break;
                }
            };

            let closing = matches!(command, Command::Close);
            if let Err(e) = self.execute(command) {
                tracing::debug!(parent: &self.span, error = %e, "failed to send reply");
                break;
            }
            if closing {
                tracing::debug!(parent: &self.span, "session closed by client");
                break;
            }
        }
        self.framed.shutdown();
    }

    /// Run one command and send its replies. Only send failures are returned.
    fn execute(&mut self, command: Command) -> CabinetResult<()> {
        let name = command.name();
        let store = &self.shared.store;

        let outcome: CabinetResult<Option<Reply>> = match command {
            Command::Put { key, value } => store
                .put(&key, &value)
                .map(|previous| (!self.optimized).then_some(Reply::Value(previous))),
            Command::Get { key } => store.get(&key).map(|value| Some(Reply::Value(value))),
            Command::Remove { key } => store
                .remove(&key)
                .map(|previous| (!self.optimized).then_some(Reply::Value(previous))),
            Command::Iterate { worker, config } => self
                .shared
                .registry
                .run(&worker, store, &config)
                .map(|bytes| Some(Reply::Worker(bytes))),
            Command::Size => store.size().and_then(|count| {
                i64::try_from(count)
                    .map(|count| Some(Reply::Size(count)))
                    .map_err(|_| CabinetError::SizeOverflow {
                        count,
                        target: "i64",
                    })
            }),
            Command::Clear => store.clear().map(|_| None),
            Command::SetOptimize { optimize } => {
                self.optimized = optimize;
                tracing::debug!(parent: &self.span, optimize, "connection mode changed");
                Ok(None)
            }
            Command::Close => Ok(None),
        };

        match outcome {
            Ok(payload) => {
                if let Some(payload) = payload {
                    self.framed.send(&payload)?;
                }
                self.framed.send(&Reply::Status(Status::Success))?;
                self.shared
                    .metrics
                    .commands_processed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.shared.metrics.commands_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(parent: &self.span, command = name, error = %e, "command failed");
                self.framed
                    .send(&Reply::Status(Status::Failure(e.to_string())))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::codec::ClientCodec;

    fn start(store: Arc<ConcurrentStore>, optimize: bool) -> ServerHandle {
        let config = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            optimize,
            ..ServerConfig::default()
        };
        Server::new(store, config).start().unwrap()
    }

    fn connect(handle: &ServerHandle) -> FramedStream<ClientCodec> {
        let stream = TcpStream::connect(handle.local_addr()).unwrap();
        FramedStream::new(stream, ClientCodec::new(1024 * 1024))
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(42).to_string(), "conn-42");
    }

    #[test]
    fn test_wake_addr_replaces_unspecified() {
        let addr: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        assert_eq!(wake_addr(addr), "127.0.0.1:9000".parse().unwrap());
        let addr: SocketAddr = "10.0.0.5:9000".parse().unwrap();
        assert_eq!(wake_addr(addr), addr);
    }

    #[test]
    fn test_handshake_and_unoptimized_put() {
        let store = Arc::new(ConcurrentStore::in_memory());
        let handle = start(Arc::clone(&store), false);
        let mut client = connect(&handle);

        assert_eq!(
            client.recv().unwrap(),
            Some(Reply::ConnectionOkay {
                version: PROTOCOL_VERSION,
                optimized: false,
            })
        );

        client
            .send(&Command::Put {
                key: b"k".to_vec(),
                value: b"v1".to_vec(),
            })
            .unwrap();
        assert_eq!(client.recv().unwrap(), Some(Reply::Value(None)));
        assert_eq!(client.recv().unwrap(), Some(Reply::Status(Status::Success)));

        client
            .send(&Command::Put {
                key: b"k".to_vec(),
                value: b"v2".to_vec(),
            })
            .unwrap();
        assert_eq!(client.recv().unwrap(), Some(Reply::Value(Some(b"v1".to_vec()))));
        assert_eq!(client.recv().unwrap(), Some(Reply::Status(Status::Success)));
        assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_failure_omits_payload_and_keeps_connection() {
        let store = Arc::new(ConcurrentStore::in_memory());
        let handle = start(store, true);
        let mut client = connect(&handle);
        client.recv().unwrap();

        client
            .send(&Command::Iterate {
                worker: "no-such-worker".to_string(),
                config: vec![],
            })
            .unwrap();
        match client.recv().unwrap() {
            Some(Reply::Status(Status::Failure(message))) => {
                assert!(message.contains("no-such-worker"))
            }
            other => panic!("expected failure status, got {:?}", other),
        }

        client.send(&Command::Size).unwrap();
        assert_eq!(client.recv().unwrap(), Some(Reply::Size(0)));
        assert_eq!(client.recv().unwrap(), Some(Reply::Status(Status::Success)));
        assert_eq!(handle.metrics().commands_failed, 1);
    }

    #[test]
    fn test_rejected_peer_gets_nothing() {
        let store = Arc::new(ConcurrentStore::in_memory());
        let config = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let handle = Server::new(store, config)
            .with_access_control(|_: &str| false)
            .start()
            .unwrap();

        let mut client = connect(&handle);
        assert_eq!(client.recv().unwrap(), None);
        assert_eq!(handle.metrics().connections_rejected, 1);
        assert_eq!(handle.metrics().connections_total, 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let store = Arc::new(ConcurrentStore::in_memory());
        let mut handle = start(store, false);
        let addr = handle.local_addr();
        handle.shutdown();
        handle.shutdown();
        assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
    }
}
