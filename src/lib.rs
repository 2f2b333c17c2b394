//! DCTP (Dual-Channel Transport Protocol) support for Rust
//!
//! DCTP is a user-space transport protocol layered on top of UDP. Every
//! segment an application writes is routed onto one of two logical channels:
//! a RELIABLE channel (retransmitted until acknowledged, delivered in order)
//! or an UNRELIABLE channel (best-effort, fire-and-forget). The split is
//! decided per segment by a Bernoulli draw, so a single byte stream degrades
//! gracefully between TCP-like and UDP-like behavior.
//!
//! The protocol engine is single-threaded and cooperative: all state
//! transitions happen inside the application's calls to [`Transport::send`],
//! [`Transport::recv`], [`Transport::poll`] and [`Transport::drain`]. Time
//! and randomness are injected, which keeps the engine deterministic under
//! test.

#![warn(rust_2018_idioms)]

mod clock;
mod config;
mod endpoint;
mod error;
pub mod packet;
mod receiver;
mod sender;
mod transport;
mod util;

pub use crate::clock::{Clock, MonotonicClock};
pub use crate::config::{
    TransportConfig, DEFAULT_MTU, DEFAULT_PROB_RELIABLE, DEFAULT_WINDOW,
};
pub use crate::endpoint::{DatagramEndpoint, UdpEndpoint};
pub use crate::error::{Error, Result};
pub use crate::packet::{ChannelType, Packet, PacketType, SackBlock};
pub use crate::receiver::Receiver;
pub use crate::sender::{Sender, SenderMetrics, DEFAULT_RTO_MS, MAXIMUM_RTO_MS, MIN_RTO_MS};
pub use crate::transport::{Transport, TransportStats};
