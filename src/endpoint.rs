use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use log::debug;

use crate::error::Result;

/// Pluggable datagram substrate under a [`Transport`](crate::Transport).
///
/// The production implementation wraps a non-blocking UDP socket; tests
/// swap in queue-backed fakes. `recv_from` must never block and `send_to`
/// must never pend the engine; `wait_ready` is the only blocking call and
/// is bounded by its timeout.
pub trait DatagramEndpoint: fmt::Debug {
    fn bind(&mut self, addr: SocketAddr) -> Result<()>;
    /// Prepare for sending to `addr` (e.g. lazily open a socket). Peer
    /// bookkeeping lives in the transport, not here.
    fn connect(&mut self, addr: SocketAddr) -> Result<()>;
    fn send_to(&mut self, frame: &[u8], dst: SocketAddr) -> Result<usize>;
    /// Non-blocking receive; `Ok(None)` when no datagram is pending.
    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>>;
    /// Wait up to `timeout_ms` for a datagram to become readable.
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<bool>;
    fn close(&mut self) -> Result<()>;
}

/// [`DatagramEndpoint`] over a non-blocking `std::net::UdpSocket`.
#[derive(Debug, Default)]
pub struct UdpEndpoint {
    sock: Option<UdpSocket>,
}

impl UdpEndpoint {
    pub fn new() -> Self {
        UdpEndpoint { sock: None }
    }

    fn ensure_socket(&mut self) -> Result<()> {
        if self.sock.is_none() {
            let sock = UdpSocket::bind(("0.0.0.0", 0))?;
            sock.set_nonblocking(true)?;
            debug!("created UDP socket on {}", sock.local_addr()?);
            self.sock = Some(sock);
        }
        Ok(())
    }
}

impl DatagramEndpoint for UdpEndpoint {
    fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        let sock = UdpSocket::bind(addr)?;
        sock.set_nonblocking(true)?;
        self.sock = Some(sock);
        Ok(())
    }

    fn connect(&mut self, _addr: SocketAddr) -> Result<()> {
        // The socket stays unconnected so feedback can go back to whatever
        // source address a frame arrived from.
        self.ensure_socket()
    }

    fn send_to(&mut self, frame: &[u8], dst: SocketAddr) -> Result<usize> {
        self.ensure_socket()?;
        match &self.sock {
            Some(sock) => Ok(sock.send_to(frame, dst)?),
            None => Ok(0),
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        let sock = match &self.sock {
            Some(sock) => sock,
            None => return Ok(None),
        };
        match sock.recv_from(buf) {
            Ok((n, src)) => Ok(Some((n, src))),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn wait_ready(&mut self, timeout_ms: u32) -> Result<bool> {
        let sock = match &self.sock {
            Some(sock) => sock,
            None => return Ok(false),
        };

        let mut probe = [0u8; 1];
        if timeout_ms == 0 {
            return match sock.peek_from(&mut probe) {
                Ok(_) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
                Err(e) => Err(e.into()),
            };
        }

        // Block on a bounded peek, then restore non-blocking mode for the
        // drain loop that follows.
        sock.set_nonblocking(false)?;
        sock.set_read_timeout(Some(Duration::from_millis(u64::from(timeout_ms))))?;
        let ready = match sock.peek_from(&mut probe) {
            Ok(_) => Ok(true),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        };
        sock.set_nonblocking(true)?;
        ready
    }

    fn close(&mut self) -> Result<()> {
        self.sock = None;
        Ok(())
    }
}
