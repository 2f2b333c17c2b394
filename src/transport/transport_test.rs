use super::*;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Result;
use crate::packet::CH_RELIABLE;

type Mailbox = Rc<RefCell<VecDeque<(Bytes, SocketAddr)>>>;

/// Manually advanced clock shared with the transport under test.
#[derive(Debug)]
struct TestClock {
    now_ms: Cell<u32>,
}

impl TestClock {
    fn new(start: u32) -> Arc<Self> {
        Arc::new(TestClock {
            now_ms: Cell::new(start),
        })
    }

    fn advance(&self, delta: u32) {
        self.now_ms.set(self.now_ms.get() + delta);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u32 {
        self.now_ms.get()
    }
}

/// In-memory datagram endpoint: frames sent to a known address land in
/// that peer's mailbox, anything else is dropped like a lossy network.
#[derive(Debug)]
struct QueueEndpoint {
    addr: SocketAddr,
    inbox: Mailbox,
    routes: Vec<(SocketAddr, Mailbox)>,
}

impl DatagramEndpoint for QueueEndpoint {
    fn bind(&mut self, _addr: SocketAddr) -> Result<()> {
        Ok(())
    }

    fn connect(&mut self, _addr: SocketAddr) -> Result<()> {
        Ok(())
    }

    fn send_to(&mut self, frame: &[u8], dst: SocketAddr) -> Result<usize> {
        for (addr, mailbox) in &self.routes {
            if *addr == dst {
                mailbox
                    .borrow_mut()
                    .push_back((Bytes::copy_from_slice(frame), self.addr));
                break;
            }
        }
        Ok(frame.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.inbox.borrow_mut().pop_front() {
            Some((frame, src)) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(Some((frame.len(), src)))
            }
            None => Ok(None),
        }
    }

    fn wait_ready(&mut self, _timeout_ms: u32) -> Result<bool> {
        Ok(!self.inbox.borrow().is_empty())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    a: Transport,
    b: Transport,
    a_addr: SocketAddr,
    a_inbox: Mailbox,
    b_inbox: Mailbox,
    clock: Arc<TestClock>,
}

/// Two transports joined by in-memory mailboxes; `a` is connected to `b`,
/// `b` learns its peer from inbound DATA.
fn harness(prob_reliable: f64) -> Harness {
    use rand::SeedableRng;

    let a_addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
    let b_addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();
    let a_inbox: Mailbox = Rc::new(RefCell::new(VecDeque::new()));
    let b_inbox: Mailbox = Rc::new(RefCell::new(VecDeque::new()));

    let a_ep = QueueEndpoint {
        addr: a_addr,
        inbox: a_inbox.clone(),
        routes: vec![(b_addr, b_inbox.clone())],
    };
    let b_ep = QueueEndpoint {
        addr: b_addr,
        inbox: b_inbox.clone(),
        routes: vec![(a_addr, a_inbox.clone())],
    };

    let clock = TestClock::new(10_000);
    let config = TransportConfig::new()
        .with_mtu(114) // MSS of 100 keeps segment arithmetic readable
        .with_prob_reliable(prob_reliable);

    let mut a = Transport::with_parts(
        config.clone(),
        Box::new(a_ep),
        clock.clone(),
        rand::rngs::StdRng::seed_from_u64(1),
    );
    let b = Transport::with_parts(
        config,
        Box::new(b_ep),
        clock.clone(),
        rand::rngs::StdRng::seed_from_u64(2),
    );

    a.connect(b_addr).unwrap();

    Harness {
        a,
        b,
        a_addr,
        a_inbox,
        b_inbox,
        clock,
    }
}

#[test]
fn test_end_to_end_reliable_delivery() -> Result<()> {
    let mut h = harness(1.0);

    let accepted = h.a.send(b"hello world")?;
    assert_eq!(accepted, 11);

    // B consumes the DATA and feeds an ACK straight back to A's mailbox.
    h.b.poll(0)?;
    assert_eq!(h.b.recv(1024), Bytes::from_static(b"hello world"));
    assert!(!h.a_inbox.borrow().is_empty());

    h.a.poll(0)?;
    assert!(!h.a.sender.has_unacked());
    assert!(!h.a.sender.has_reliable_inflight());

    let a_stats = h.a.stats();
    assert_eq!(a_stats.frames_tx, 1);
    assert_eq!(a_stats.acks_rx, 1);
    let b_stats = h.b.stats();
    assert_eq!(b_stats.frames_rx, 1);
    assert_eq!(b_stats.acks_tx, 1);
    Ok(())
}

#[test]
fn test_end_to_end_unreliable_delivery() -> Result<()> {
    let mut h = harness(0.0);

    h.a.send(b"fire and forget")?;
    h.b.poll(0)?;

    assert_eq!(h.b.recv(1024), Bytes::from_static(b"fire and forget"));
    // No feedback for unreliable frames, nothing left in flight.
    assert!(h.a_inbox.borrow().is_empty());
    assert_eq!(h.b.stats().acks_tx, 0);
    assert!(!h.a.sender.has_unacked());
    Ok(())
}

#[test]
fn test_peer_learned_from_first_data() -> Result<()> {
    let mut h = harness(1.0);

    assert!(h.b.peer.is_none());
    h.a.send(b"hi")?;
    h.b.poll(0)?;
    assert_eq!(h.b.peer, Some(h.a_addr));
    Ok(())
}

#[test]
fn test_corrupted_frame_is_discarded() -> Result<()> {
    let mut h = harness(1.0);

    // Garbage ahead of a valid frame must not poison the poll loop.
    h.b_inbox
        .borrow_mut()
        .push_back((Bytes::from_static(b"\xde\xad\xbe\xef"), h.a_addr));
    h.a.send(b"good frame")?;

    h.b.poll(0)?;
    assert_eq!(h.b.recv(1024), Bytes::from_static(b"good frame"));
    assert_eq!(h.b.stats().frames_rx, 2);
    Ok(())
}

#[test]
fn test_recv_cap_stashes_surplus() -> Result<()> {
    let mut h = harness(1.0);

    h.a.send(b"abcdefghij")?;
    h.b.poll(0)?;

    assert_eq!(h.b.recv(4), Bytes::from_static(b"abcd"));
    assert_eq!(h.b.recv(4), Bytes::from_static(b"efgh"));
    assert_eq!(h.b.recv(4), Bytes::from_static(b"ij"));
    assert!(h.b.recv(4).is_empty());
    Ok(())
}

#[test]
fn test_lost_segment_is_retransmitted() -> Result<()> {
    let mut h = harness(1.0);

    // Two segments; the first datagram is lost in transit.
    h.a.send(&[b'A'; 150])?;
    assert_eq!(h.b_inbox.borrow().len(), 2);
    h.b_inbox.borrow_mut().pop_front();

    // B buffers the tail out of order and SACKs it.
    h.b.poll(0)?;
    assert!(h.b.recv(1024).is_empty());
    h.a.poll(0)?;
    assert_eq!(h.a.stats().sacks_rx, 1);

    // After the RTO the head goes out again and the stream completes.
    h.clock.advance(2000);
    h.a.poll(0)?;
    h.b.poll(0)?;
    assert_eq!(h.b.recv(1024).len(), 150);

    h.a.poll(0)?;
    assert!(!h.a.sender.has_reliable_inflight());
    assert_eq!(h.a.stats().sender.retransmits, 1);
    Ok(())
}

#[test]
fn test_drain_completes_over_lossless_link() -> Result<()> {
    let mut h = harness(1.0);

    h.a.send(&[b'X'; 250])?;

    // Let B ack everything, then drain A.
    h.b.poll(0)?;
    h.a.drain()?;
    assert!(!h.a.sender.has_reliable_inflight());
    assert_eq!(h.b.recv(1024).len(), 250);
    Ok(())
}

#[test]
fn test_feedback_per_data_frame_in_order() -> Result<()> {
    let mut h = harness(1.0);

    h.a.send(&[b'A'; 300])?;
    assert_eq!(h.b_inbox.borrow().len(), 3);

    h.b.poll(0)?;
    // One feedback frame per DATA frame, sent as each one is processed.
    assert_eq!(h.a_inbox.borrow().len(), 3);
    let acks: Vec<u32> = h
        .a_inbox
        .borrow()
        .iter()
        .map(|(raw, _)| match Packet::unmarshal(raw).unwrap() {
            Packet::Ack { ack, .. } | Packet::Sack { ack, .. } => ack,
            other => panic!("expected feedback, got {other}"),
        })
        .collect();
    assert_eq!(acks, vec![100, 200, 300]);
    Ok(())
}

#[test]
fn test_feedback_channel_is_reliable_marker() -> Result<()> {
    let mut h = harness(1.0);

    h.a.send(b"ping")?;
    h.b.poll(0)?;

    let (raw, _) = h.a_inbox.borrow_mut().pop_front().expect("feedback frame");
    let fb = Packet::unmarshal(&raw).unwrap();
    assert_eq!(fb.channel(), CH_RELIABLE);
    Ok(())
}
