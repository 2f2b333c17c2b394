#[cfg(test)]
mod receiver_test;

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use log::trace;

use crate::error::{Error, Result};
use crate::packet::{Packet, SackBlock, CH_RELIABLE, CH_UNRELIABLE, MAX_SACK_BLOCKS};

/// Feedback frames report at most this many SACK blocks.
const SACK_BLOCK_LIMIT: usize = 4;

/// Receiver side of the protocol: reassembles the reliable byte stream and
/// generates ACK/SACK feedback.
///
/// Unreliable payloads bypass reassembly entirely and land straight in the
/// delivery queue. Reliable payloads are buffered until contiguous with
/// `rcv_nxt`, which only ever moves forward.
#[derive(Debug)]
pub struct Receiver {
    /// Next in-order byte expected; doubles as the cumulative ack point.
    rcv_nxt: u32,
    /// Advertised receive window in bytes.
    wnd_bytes: u16,
    sack_enabled: bool,
    /// Out-of-order arrivals above `rcv_nxt`, keyed by start offset.
    buf: BTreeMap<u32, Bytes>,
    /// Contiguous bytes awaiting application pickup.
    delivered: BytesMut,
}

impl Receiver {
    pub fn new(wnd_bytes: u16, sack_enabled: bool) -> Self {
        Receiver {
            rcv_nxt: 0,
            wnd_bytes,
            sack_enabled,
            buf: BTreeMap::new(),
            delivered: BytesMut::new(),
        }
    }

    /// Consume a DATA packet. Returns the feedback packet to send for a
    /// reliable frame, `None` for an unreliable one, and a usage error for
    /// any other packet kind.
    pub fn on_data(&mut self, pkt: &Packet) -> Result<Option<Packet>> {
        let (channel, seq, ts_send, payload) = match pkt {
            Packet::Data {
                channel,
                seq,
                ts_send,
                payload,
            } => (*channel, *seq, *ts_send, payload),
            _ => return Err(Error::ErrNotDataPacket),
        };

        trace!(
            "RX   | ch={} | seq={} len={} ts={}",
            channel,
            seq,
            payload.len(),
            ts_send
        );

        if channel == CH_UNRELIABLE {
            if !payload.is_empty() {
                self.delivered.extend_from_slice(payload);
            }
            return Ok(None);
        }

        // Entirely at or below rcv_nxt: a pure duplicate.
        if seq.saturating_add(payload.len() as u32) <= self.rcv_nxt {
            return Ok(Some(self.feedback(ts_send)));
        }

        // Trim the already-delivered left edge down to the unseen portion.
        let mut seq = seq;
        let mut pay = payload.clone();
        if seq < self.rcv_nxt {
            let trim = (self.rcv_nxt - seq) as usize;
            pay = pay.slice(trim..);
            seq = self.rcv_nxt;
        }

        if !pay.is_empty() {
            // Last write wins on an exact duplicate key; under the codec
            // invariant the bytes are identical anyway.
            self.buf.insert(seq, pay);
        }

        self.consume_contiguous();

        Ok(Some(self.feedback(ts_send)))
    }

    /// Return and clear the app-deliverable bytes accumulated so far.
    pub fn pop_deliverable(&mut self) -> Bytes {
        self.delivered.split().freeze()
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    /// Build the ACK or SACK packet describing the current receive state.
    pub fn feedback(&self, ts_echo: u32) -> Packet {
        let blocks = self.build_sack_blocks(SACK_BLOCK_LIMIT);
        if !blocks.is_empty() && self.sack_enabled {
            Packet::Sack {
                channel: CH_RELIABLE,
                seq: self.rcv_nxt,
                ts_send: 0,
                ack: self.rcv_nxt,
                rcv_wnd: self.wnd_bytes,
                ts_echo,
                blocks,
            }
        } else {
            Packet::Ack {
                channel: CH_RELIABLE,
                seq: self.rcv_nxt,
                ts_send: 0,
                ack: self.rcv_nxt,
                rcv_wnd: self.wnd_bytes,
                ts_echo,
            }
        }
    }

    /// Greedily deliver buffered chunks that start exactly at `rcv_nxt`.
    fn consume_contiguous(&mut self) {
        while let Some(chunk) = self.buf.remove(&self.rcv_nxt) {
            self.rcv_nxt += chunk.len() as u32;
            self.delivered.extend_from_slice(&chunk);
        }
    }

    /// Merged, non-overlapping SACK blocks for buffered data strictly above
    /// `rcv_nxt`, reported most-recent-gap-first (descending `start`).
    fn build_sack_blocks(&self, limit: usize) -> Vec<SackBlock> {
        let mut merged: Vec<SackBlock> = Vec::new();
        for (&s, p) in &self.buf {
            let e = s.saturating_add(p.len() as u32);
            if e <= self.rcv_nxt {
                continue;
            }
            let s = s.max(self.rcv_nxt);
            if s >= e {
                continue;
            }
            // The map iterates in ascending order, so touching or
            // overlapping spans always involve the last merged block.
            match merged.last_mut() {
                Some(last) if s <= last.end => last.end = last.end.max(e),
                _ => merged.push(SackBlock { start: s, end: e }),
            }
        }

        merged.reverse();
        merged.truncate(limit.min(MAX_SACK_BLOCKS));
        merged
    }
}
