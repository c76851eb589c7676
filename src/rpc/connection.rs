//! Blocking framed connection.

use super::codec::ProtocolCodec;
use super::DecodeResult;
use crate::core::error::{CabinetError, CabinetResult};
use bytes::BytesMut;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Initial read buffer capacity.
const READ_CHUNK: usize = 64 * 1024;

/// Connection statistics.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Frames received.
    pub frames_received: AtomicU64,
    /// Frames sent.
    pub frames_sent: AtomicU64,
    /// Bytes received.
    pub bytes_received: AtomicU64,
    /// Bytes sent.
    pub bytes_sent: AtomicU64,
}

impl ConnectionStats {
    fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_sent(&self, bytes: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }
}

/// A TCP stream that reads and writes whole frames.
pub struct FramedStream<C: ProtocolCodec> {
    stream: TcpStream,
    codec: C,
    read_buffer: BytesMut,
    stats: Arc<ConnectionStats>,
}

impl<C: ProtocolCodec> FramedStream<C> {
    pub fn new(stream: TcpStream, codec: C) -> Self {
        Self {
            stream,
            codec,
            read_buffer: BytesMut::with_capacity(READ_CHUNK),
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    /// Write one message as a single frame.
    pub fn send(&mut self, message: &C::Outbound) -> CabinetResult<()> {
        let frame = self.codec.encode(message)?;
        self.stream
            .write_all(&frame)
            .and_then(|_| self.stream.flush())
            .map_err(|e| CabinetError::transport(format!("write failed: {}", e)))?;
        self.stats.record_sent(frame.len() as u64);
        Ok(())
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a frame
    /// boundary. EOF inside a frame is a transport error; a frame the codec
    /// rejects is a protocol violation.
    pub fn recv(&mut self) -> CabinetResult<Option<C::Inbound>> {
        let mut chunk = [0u8; 8 * 1024];
        loop {
            match self.codec.decode(&mut self.read_buffer) {
                DecodeResult::Complete(message) => {
                    self.stats.record_frame();
                    return Ok(Some(message));
                }
                DecodeResult::Invalid(reason) => return Err(CabinetError::protocol(reason)),
                DecodeResult::Incomplete => {}
            }

            let n = match self.stream.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CabinetError::transport(format!("read failed: {}", e))),
            };
            if n == 0 {
                if self.read_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(CabinetError::transport(format!(
                    "connection closed inside a frame ({} bytes buffered)",
                    self.read_buffer.len()
                )));
            }
            self.stats.record_received(n as u64);
            self.read_buffer.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Independent handle to the same socket, used to force a blocked
    /// reader or writer out.
    pub fn try_clone_stream(&self) -> CabinetResult<TcpStream> {
        Ok(self.stream.try_clone()?)
    }

    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> CabinetResult<()> {
        Ok(self.stream.set_read_timeout(timeout)?)
    }

    /// Shut down both directions. Errors on an already closed socket are
    /// ignored.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }
}
