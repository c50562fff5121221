//! Per-client connection state
//!
//! Each record owns its socket, an outgoing frame buffer, a read buffer
//! that carries partial frames between receives, and a backlog for bytes
//! the socket refused. All buffers are allocated once at accept time.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use log::{debug, trace};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use super::stats::{bump, ServerStats};
use crate::core::ClientId;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{ByteSpan, FrameBuffer, Frames, LENGTH_PREFIX};

/// Unsent bytes a client may accumulate before it is dropped
pub const MAX_BACKLOG: usize = 1024 * 1024;

/// Kernel socket buffer size requested for every client
#[cfg(unix)]
const SOCKET_BUFFER_SIZE: libc::c_int = 256 * 1024;

/// Why a client left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Orderly close, the socket read returned 0
    PeerClosed,
    /// Socket error other than would-block
    Io(io::ErrorKind),
    /// Malformed inbound data
    Protocol(ProtocolError),
    /// Write backlog passed [`MAX_BACKLOG`]
    BacklogFull,
    /// Removed by the application
    Kicked,
    /// Whole-server shutdown
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => f.write_str("peer closed"),
            DisconnectReason::Io(kind) => write!(f, "i/o error: {:?}", kind),
            DisconnectReason::Protocol(err) => write!(f, "protocol error: {}", err),
            DisconnectReason::BacklogFull => f.write_str("write backlog full"),
            DisconnectReason::Kicked => f.write_str("kicked"),
            DisconnectReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

impl From<io::Error> for DisconnectReason {
    fn from(err: io::Error) -> Self {
        DisconnectReason::Io(err.kind())
    }
}

/// Outcome of staging one frame.
#[derive(Debug)]
pub(crate) enum Staged {
    Queued,
    Dropped(Error),
}

pub(crate) struct ClientRecord {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub token: Token,
    stream: TcpStream,
    /// Outgoing frames for the current tick
    pub frames: FrameBuffer,
    read_buffer: Box<[u8]>,
    read_len: usize,
    backlog: Vec<u8>,
}

impl ClientRecord {
    pub fn new(id: ClientId, stream: TcpStream, addr: SocketAddr, buffer_size: usize) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        tune_socket_buffers(&stream);

        Ok(Self {
            id,
            addr,
            token: Token(0),
            stream,
            frames: FrameBuffer::new(buffer_size),
            read_buffer: vec![0u8; buffer_size].into_boxed_slice(),
            read_len: 0,
            backlog: Vec::new(),
        })
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.stream, token, Interest::READABLE)?;
        self.token = token;
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Bytes waiting for the socket to drain
    #[inline(always)]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Read until the socket would block, handing every complete frame to
    /// `on_frame`. A trailing partial frame stays buffered for the next call.
    ///
    /// Returns the number of bytes read. Frames handed over before an error
    /// stay delivered.
    pub fn receive<F>(&mut self, stats: &ServerStats, mut on_frame: F) -> Result<usize, DisconnectReason>
    where
        F: FnMut(ByteSpan<'_>) -> Result<(), ProtocolError>,
    {
        let mut total = 0;
        loop {
            match self.stream.read(&mut self.read_buffer[self.read_len..]) {
                Ok(0) => return Err(DisconnectReason::PeerClosed),
                Ok(n) => {
                    trace!("{} read {} bytes", self.id, n);
                    self.read_len += n;
                    total += n;
                    bump(&stats.bytes_received, n as u64);
                    self.drain_frames(&mut on_frame)
                        .map_err(DisconnectReason::Protocol)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn drain_frames<F>(&mut self, on_frame: &mut F) -> Result<(), ProtocolError>
    where
        F: FnMut(ByteSpan<'_>) -> Result<(), ProtocolError>,
    {
        let capacity = self.read_buffer.len();
        let mut frames = Frames::new(&self.read_buffer[..self.read_len]);
        for frame in frames.by_ref() {
            on_frame(frame?)?;
        }

        if let Some(total) = frames.pending_frame_len() {
            // Would never fit, so the read buffer could never make progress
            if total > capacity {
                return Err(ProtocolError::OversizedFrame {
                    declared: total - LENGTH_PREFIX,
                    capacity,
                });
            }
        }

        let consumed = frames.consumed();
        if consumed > 0 {
            self.read_buffer.copy_within(consumed..self.read_len, 0);
            self.read_len -= consumed;
        }
        Ok(())
    }

    /// Stage a frame, flushing once to make room if the buffer is full.
    ///
    /// `Err` means the flush failed and the client must be dropped.
    pub fn stage<F>(&mut self, stats: &ServerStats, encode: F) -> Result<Staged, DisconnectReason>
    where
        F: Fn(&mut FrameBuffer) -> Result<()>,
    {
        match encode(&mut self.frames) {
            Ok(()) => return Ok(Staged::Queued),
            Err(Error::Capacity { .. }) if !self.frames.is_empty() => {}
            Err(err) => return Ok(Staged::Dropped(err)),
        }

        self.flush(stats)?;
        Ok(match encode(&mut self.frames) {
            Ok(()) => Staged::Queued,
            Err(err) => Staged::Dropped(err),
        })
    }

    /// Send the backlog, then the staged frames, and reset the frame buffer.
    ///
    /// Whatever the socket refuses joins the backlog for the next flush.
    pub fn flush(&mut self, stats: &ServerStats) -> Result<usize, DisconnectReason> {
        let mut written = 0;

        if !self.backlog.is_empty() {
            let n = write_some(&mut self.stream, &self.backlog)?;
            self.backlog.drain(..n);
            written += n;
        }

        if !self.frames.is_empty() {
            let staged = self.frames.as_bytes();
            let n = if self.backlog.is_empty() {
                write_some(&mut self.stream, staged)?
            } else {
                0
            };
            self.backlog.extend_from_slice(&staged[n..]);
            written += n;
            self.frames.reset();
        }

        if !self.backlog.is_empty() {
            debug!("{} would block, {} bytes backlogged", self.id, self.backlog_len());
        }
        if self.backlog.len() > MAX_BACKLOG {
            return Err(DisconnectReason::BacklogFull);
        }

        if written > 0 {
            trace!("{} flushed {} bytes", self.id, written);
            bump(&stats.bytes_sent, written as u64);
        }
        Ok(written)
    }
}

impl fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRecord")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("token", &self.token)
            .field("staged", &self.frames.len())
            .field("buffered", &self.read_len)
            .field("backlog", &self.backlog.len())
            .finish()
    }
}

/// Write as much of `bytes` as the socket takes without blocking.
fn write_some(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                ));
            }
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

#[cfg(unix)]
fn tune_socket_buffers(stream: &TcpStream) {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    for option in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        // SAFETY: fd is a live socket owned by `stream`, optval outlives the call
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                &SOCKET_BUFFER_SIZE as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            debug!("setsockopt({}) failed: {}", option, io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn tune_socket_buffers(_stream: &TcpStream) {}
