//! Connection configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{LENGTH_PREFIX, MAX_FRAME_LEN, NOTICE_LEN};

/// Smallest buffer that still fits one roster notice plus the spare byte
pub const MIN_BUFFER_SIZE: usize = LENGTH_PREFIX + NOTICE_LEN + 1;

/// Largest useful buffer: one maximal frame plus the spare byte
pub const MAX_BUFFER_SIZE: usize = LENGTH_PREFIX + MAX_FRAME_LEN + 1;

/// Which half of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Server,
    /// Not implemented; rejected at construction
    Client,
}

/// Settings fixed when a connection is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub role: Role,
    pub bind_addr: IpAddr,
    /// 0 lets the OS pick a port
    pub port: u16,
    /// Simultaneous clients; the poll set holds one more for the listener
    pub max_clients: usize,
    /// Bytes per client frame buffer and per client read buffer
    pub buffer_size: usize,
    /// Run the network loop on its own thread
    pub threaded: bool,
    /// Pause between ticks in threaded mode
    pub tick_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            max_clients: 4,
            buffer_size: 2048,
            threaded: false,
            tick_interval: Duration::from_millis(17),
        }
    }
}

impl ConnectionConfig {
    /// Server on localhost with an ephemeral port.
    pub fn ephemeral() -> Self {
        Self {
            port: 0,
            ..Self::default()
        }
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Switch to threaded mode ticking every `interval`.
    pub fn threaded(mut self, interval: Duration) -> Self {
        self.threaded = true;
        self.tick_interval = interval;
        self
    }

    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Sockets the poll set must hold, listener included.
    #[inline]
    pub fn poll_capacity(&self) -> usize {
        self.max_clients + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(Error::Config("max_clients must be at least 1".into()));
        }
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "buffer_size {} cannot hold a roster notice (minimum {})",
                self.buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "buffer_size {} exceeds the largest frame (maximum {})",
                self.buffer_size, MAX_BUFFER_SIZE
            )));
        }
        if self.threaded && self.tick_interval.is_zero() {
            return Err(Error::Config("tick_interval must be non-zero".into()));
        }
        Ok(())
    }
}
