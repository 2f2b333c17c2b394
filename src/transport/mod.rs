#[cfg(test)]
mod transport_test;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::{Clock, MonotonicClock};
use crate::config::TransportConfig;
use crate::endpoint::{DatagramEndpoint, UdpEndpoint};
use crate::error::Result;
use crate::packet::{Packet, BASE_LEN};
use crate::receiver::Receiver;
use crate::sender::{Sender, SenderMetrics};

/// Upper bound on a single inbound datagram.
const RECV_BUF_LEN: usize = 65535;
/// Poll granularity used by `drain`.
const DRAIN_POLL_MS: u32 = 5;

/// Bidirectional DCTP endpoint: a [`Sender`] and a [`Receiver`] composed
/// over a [`DatagramEndpoint`].
///
/// Single-threaded and cooperative. All protocol progress happens inside
/// [`send`](Transport::send), [`recv`](Transport::recv),
/// [`poll`](Transport::poll) and [`drain`](Transport::drain); only `poll`
/// blocks, bounded by its timeout.
#[derive(Debug)]
pub struct Transport {
    sender: Sender,
    receiver: Receiver,
    endpoint: Box<dyn DatagramEndpoint>,
    peer: Option<SocketAddr>,
    verbose: bool,

    /// Delivered bytes in excess of a `recv` cap, held for the next call.
    rx_stash: BytesMut,

    bytes_tx: u64,
    bytes_rx: u64,
    frames_tx: u64,
    frames_rx: u64,
    acks_tx: u64,
    acks_rx: u64,
    sacks_tx: u64,
    sacks_rx: u64,
}

impl Transport {
    /// Production transport over UDP with a live clock and entropy-seeded
    /// RNG.
    pub fn new(config: TransportConfig) -> Self {
        Transport::with_parts(
            config,
            Box::new(UdpEndpoint::new()),
            Arc::new(MonotonicClock::new()),
            StdRng::from_entropy(),
        )
    }

    /// Seam for tests and custom integrations: caller supplies the
    /// endpoint, clock and RNG.
    pub fn with_parts(
        config: TransportConfig,
        endpoint: Box<dyn DatagramEndpoint>,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        let mss = config.mtu().saturating_sub(BASE_LEN).max(1);
        let sender = Sender::new(
            mss,
            config.window(),
            config.prob_reliable(),
            config.sack_enabled(),
            clock,
            rng,
        );
        // The advertised window saturates at the wire width of `rcv_wnd`.
        let wnd_bytes = config.window().min(usize::from(u16::MAX)) as u16;
        let receiver = Receiver::new(wnd_bytes, config.sack_enabled());

        Transport {
            sender,
            receiver,
            endpoint,
            peer: None,
            verbose: config.verbose(),
            rx_stash: BytesMut::new(),
            bytes_tx: 0,
            bytes_rx: 0,
            frames_tx: 0,
            frames_rx: 0,
            acks_tx: 0,
            acks_rx: 0,
            sacks_tx: 0,
            sacks_rx: 0,
        }
    }

    pub fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        self.endpoint.bind(addr)?;
        if self.verbose {
            debug!("bind on {addr}");
        }
        Ok(())
    }

    pub fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        self.endpoint.connect(addr)?;
        self.peer = Some(addr);
        if self.verbose {
            debug!("connect -> {addr}");
        }
        Ok(())
    }

    /// Offer data to the sender and flush whatever is due. Returns the
    /// number of bytes accepted (0 when the window is full).
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        let n = self.sender.offer(data);
        self.flush_due()?;
        Ok(n)
    }

    /// Take up to `max_bytes` of delivered data. Surplus beyond the cap is
    /// kept for the next call.
    pub fn recv(&mut self, max_bytes: usize) -> Bytes {
        let fresh = self.receiver.pop_deliverable();
        if !fresh.is_empty() {
            self.rx_stash.extend_from_slice(&fresh);
        }
        let take = self.rx_stash.len().min(max_bytes);
        self.rx_stash.split_to(take).freeze()
    }

    /// Flush due sends, wait up to `timeout_ms` for inbound datagrams,
    /// drain and dispatch them all, then flush again.
    pub fn poll(&mut self, timeout_ms: u32) -> Result<()> {
        self.flush_due()?;
        if !self.endpoint.wait_ready(timeout_ms)? {
            return Ok(());
        }

        let mut buf = vec![0u8; RECV_BUF_LEN];
        while let Some((n, src)) = self.endpoint.recv_from(&mut buf)? {
            self.bytes_rx += n as u64;
            self.frames_rx += 1;
            self.on_inbound(&buf[..n], src)?;
        }

        self.flush_due()?;
        Ok(())
    }

    /// Flush and poll until no reliable segment remains in flight.
    pub fn drain(&mut self) -> Result<()> {
        while self.sender.has_reliable_inflight() {
            self.flush_due()?;
            self.poll(DRAIN_POLL_MS)?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.endpoint.close()
    }

    /// Link counters plus the sender's metrics snapshot.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_tx: self.bytes_tx,
            bytes_rx: self.bytes_rx,
            frames_tx: self.frames_tx,
            frames_rx: self.frames_rx,
            acks_tx: self.acks_tx,
            acks_rx: self.acks_rx,
            sacks_tx: self.sacks_tx,
            sacks_rx: self.sacks_rx,
            sender: self.sender.metrics(),
        }
    }

    fn on_inbound(&mut self, raw: &[u8], src: SocketAddr) -> Result<()> {
        let frame = Bytes::copy_from_slice(raw);
        let pkt = match Packet::unmarshal(&frame) {
            Ok(pkt) => pkt,
            Err(err) => {
                // Corrupted or adversarial datagrams are dropped, never
                // fatal.
                debug!("discarding bad frame from {src}: {err}");
                return Ok(());
            }
        };

        if self.peer.is_none() && matches!(pkt, Packet::Data { .. }) {
            self.peer = Some(src);
            debug!("learned peer = {src}");
        }

        match &pkt {
            Packet::Data { .. } => {
                if let Some(fb) = self.receiver.on_data(&pkt)? {
                    match &fb {
                        Packet::Ack { .. } => self.acks_tx += 1,
                        Packet::Sack { .. } => self.sacks_tx += 1,
                        _ => {}
                    }
                    self.send_pkt(&fb, src)?;
                }
            }
            Packet::Ack { .. } => {
                self.sender.on_feedback(&pkt);
                self.acks_rx += 1;
            }
            Packet::Sack { .. } => {
                self.sender.on_feedback(&pkt);
                self.sacks_rx += 1;
            }
            Packet::Ctrl { .. } => {
                trace!("ignoring CTRL frame from {src}");
            }
        }
        Ok(())
    }

    fn flush_due(&mut self) -> Result<usize> {
        let peer = match self.peer {
            Some(peer) => peer,
            None => return Ok(0),
        };
        let mut cnt = 0;
        for pkt in self.sender.due_packets() {
            self.send_pkt(&pkt, peer)?;
            cnt += 1;
        }
        Ok(cnt)
    }

    fn send_pkt(&mut self, pkt: &Packet, dst: SocketAddr) -> Result<()> {
        let raw = pkt.marshal()?;
        self.endpoint.send_to(&raw, dst)?;
        self.bytes_tx += raw.len() as u64;
        self.frames_tx += 1;
        Ok(())
    }
}

/// Link-level counters with the sender metrics attached.
#[derive(Debug, Clone)]
pub struct TransportStats {
    pub bytes_tx: u64,
    pub bytes_rx: u64,
    pub frames_tx: u64,
    pub frames_rx: u64,
    pub acks_tx: u64,
    pub acks_rx: u64,
    pub sacks_tx: u64,
    pub sacks_rx: u64,
    pub sender: SenderMetrics,
}
