
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use fxhash::FxHashMap;
use log::trace;
use rand::rngs::StdRng;
use rand::Rng;

use crate::clock::Clock;
use crate::packet::{ChannelType, Packet, CH_RELIABLE, CH_UNRELIABLE};

/// Ceiling for the per-segment exponential backoff.
pub const MAXIMUM_RTO_MS: u32 = 8000;
/// RTO used before any RTT sample has been taken.
pub const DEFAULT_RTO_MS: u32 = 1000;
/// Floor for the computed RTO.
pub const MIN_RTO_MS: u32 = 200;

const RTO_ALPHA: f64 = 1.0 / 8.0;
const RTO_BETA: f64 = 1.0 / 4.0;
/// How many of the most recent RTT samples are retained for metrics.
const RTT_SAMPLE_WINDOW: usize = 64;

/// One data segment tracked in the in-flight map.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    /// First byte offset of this segment in its channel's stream.
    pub(crate) seq: u32,
    /// One-past-last byte offset.
    pub(crate) end: u32,
    pub(crate) payload: Bytes,
    pub(crate) chan: ChannelType,
    /// Monotonic timestamp of the last transmission, 0 if never sent.
    pub(crate) sent_ts: u32,
    pub(crate) acked: bool,
    pub(crate) retx_count: u32,
    pub(crate) rto_ms: u32,
}

/// Per-channel sequence space and in-flight map.
#[derive(Debug, Default)]
struct Lane {
    /// Cumulative-acked watermark.
    base_seq: u32,
    /// Next unassigned byte offset.
    next_seq: u32,
    inflight: FxHashMap<u32, Segment>,
}

/// Selective-repeat sender with per-segment channel routing, RTO-driven
/// retransmission and Karn-rule RTT sampling.
///
/// The sender never gives up on a reliable segment; retransmission backs
/// off exponentially up to [`MAXIMUM_RTO_MS`]. Unreliable segments go out
/// exactly once and are retired at emission time.
#[derive(Debug)]
pub struct Sender {
    mss: usize,
    win: usize,
    prob_reliable: f64,
    sack_enabled: bool,
    clock: Arc<dyn Clock>,
    rng: StdRng,

    rel: Lane,
    unrel: Lane,
    bytes_inflight: usize,

    srtt: Option<f64>,
    rttvar: Option<f64>,
    default_rto: u32,
    min_rto: u32,

    rtt_min: Option<u32>,
    rtt_max: Option<u32>,
    rtt_sum: f64,
    rtt_cnt: u64,
    rtt_samples: VecDeque<u32>,

    retx_total: u64,
    sent_rel_segments: u64,
    sent_unrel_segments: u64,

    start_time_ms: Option<u32>,
    end_time_ms: Option<u32>,
    total_packets_sent: u64,
    total_packets_received: u64,
    total_bytes_sent: u64,
}

impl Sender {
    pub fn new(
        mss: usize,
        window: usize,
        prob_reliable: f64,
        sack_enabled: bool,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        Sender {
            mss,
            win: window,
            prob_reliable: prob_reliable.max(0.0).min(1.0),
            sack_enabled,
            clock,
            rng,
            rel: Lane::default(),
            unrel: Lane::default(),
            bytes_inflight: 0,
            srtt: None,
            rttvar: None,
            default_rto: DEFAULT_RTO_MS,
            min_rto: MIN_RTO_MS,
            rtt_min: None,
            rtt_max: None,
            rtt_sum: 0.0,
            rtt_cnt: 0,
            rtt_samples: VecDeque::with_capacity(RTT_SAMPLE_WINDOW),
            retx_total: 0,
            sent_rel_segments: 0,
            sent_unrel_segments: 0,
            start_time_ms: None,
            end_time_ms: None,
            total_packets_sent: 0,
            total_packets_received: 0,
            total_bytes_sent: 0,
        }
    }

    /// Accept as much data as fits the window, segment it to MSS and route
    /// each segment onto a channel by a Bernoulli draw. Returns the number
    /// of bytes accepted (0 when the window is full or `data` is empty).
    pub fn offer(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let space = self.win.saturating_sub(self.bytes_inflight);
        if space == 0 {
            return 0;
        }

        let take = data.len().min(space);
        let mut off = 0;
        while off < take {
            let end = (off + self.mss).min(take);
            let chunk = Bytes::copy_from_slice(&data[off..end]);
            let chunk_len = chunk.len();

            let chan = if self.rng.gen_bool(self.prob_reliable) {
                CH_RELIABLE
            } else {
                CH_UNRELIABLE
            };
            let lane = if chan == CH_RELIABLE {
                &mut self.rel
            } else {
                &mut self.unrel
            };

            let seq = lane.next_seq;
            let seg = Segment {
                seq,
                end: seq + chunk_len as u32,
                payload: chunk,
                chan,
                sent_ts: 0,
                acked: false,
                retx_count: 0,
                rto_ms: DEFAULT_RTO_MS,
            };
            lane.next_seq = seg.end;
            lane.inflight.insert(seq, seg);
            self.bytes_inflight += chunk_len;

            off = end;
        }
        take
    }

    /// Build DATA packets for every segment due to go out now: unreliable
    /// segments (sent once, retired on the spot) followed by reliable
    /// segments in ascending `seq` order whose first send or RTO is due.
    pub fn due_packets(&mut self) -> Vec<Packet> {
        let now = self.clock.now_ms();
        let mut out = Vec::new();

        let mut seqs: Vec<u32> = self.unrel.inflight.keys().copied().collect();
        seqs.sort_unstable();
        for seq in seqs {
            let seg = match self.unrel.inflight.remove(&seq) {
                Some(seg) => seg,
                None => continue,
            };
            let plen = seg.payload.len();

            trace!(
                "TX   | ch={} | seq={} len={} rto={}ms",
                seg.chan,
                seg.seq,
                plen,
                seg.rto_ms
            );
            out.push(Packet::Data {
                channel: seg.chan,
                seq: seg.seq,
                ts_send: now,
                payload: seg.payload,
            });

            self.sent_unrel_segments += 1;
            self.bytes_inflight = self.bytes_inflight.saturating_sub(plen);
            if seg.end > self.unrel.base_seq {
                self.unrel.base_seq = seg.end;
            }

            if self.start_time_ms.is_none() {
                self.start_time_ms = Some(now);
            }
            self.end_time_ms = Some(now);
            self.total_packets_sent += 1;
            self.total_bytes_sent += plen as u64;
        }

        let mut seqs: Vec<u32> = self.rel.inflight.keys().copied().collect();
        seqs.sort_unstable();
        for seq in seqs {
            let seg = match self.rel.inflight.get_mut(&seq) {
                Some(seg) => seg,
                None => continue,
            };
            if seg.acked {
                continue;
            }

            let first_send = seg.sent_ts == 0;
            if !first_send && now.saturating_sub(seg.sent_ts) < seg.rto_ms {
                continue;
            }

            if first_send {
                self.sent_rel_segments += 1;
            } else {
                seg.retx_count += 1;
                self.retx_total += 1;
                seg.rto_ms = (seg.rto_ms * 2).min(MAXIMUM_RTO_MS);
            }
            seg.sent_ts = now;

            let plen = seg.payload.len();
            trace!(
                "{} | ch={} | seq={} len={} rto={}ms",
                if first_send { "TX  " } else { "RETX" },
                seg.chan,
                seg.seq,
                plen,
                seg.rto_ms
            );
            out.push(Packet::Data {
                channel: seg.chan,
                seq: seg.seq,
                ts_send: now,
                payload: seg.payload.clone(),
            });

            if self.start_time_ms.is_none() {
                self.start_time_ms = Some(now);
            }
            self.end_time_ms = Some(now);
            self.total_packets_sent += 1;
            self.total_bytes_sent += plen as u64;
        }

        out
    }

    /// Process an incoming ACK or SACK. Any other packet kind is ignored.
    ///
    /// The RTT sample is taken before retirement so the echoed timestamp
    /// still matches an in-flight segment.
    pub fn on_feedback(&mut self, pkt: &Packet) {
        let (ack, ts_echo, blocks) = match pkt {
            Packet::Ack { ack, ts_echo, .. } => (*ack, *ts_echo, None),
            Packet::Sack {
                ack,
                ts_echo,
                blocks,
                ..
            } => (*ack, *ts_echo, Some(blocks.as_slice())),
            _ => return,
        };

        self.maybe_update_rtt(ts_echo);

        self.ack_up_to(ack);

        if self.sack_enabled {
            if let Some(blocks) = blocks {
                for blk in blocks {
                    self.ack_range(blk.start, blk.end);
                }
            }
        }

        let mut freed = 0usize;
        let mut done = 0u64;
        self.rel.inflight.retain(|_, seg| {
            if seg.acked {
                freed += seg.payload.len();
                done += 1;
                false
            } else {
                true
            }
        });
        self.bytes_inflight = self.bytes_inflight.saturating_sub(freed);
        self.total_packets_received += done;
    }

    /// Number of unacknowledged bytes currently outstanding.
    pub fn inflight_bytes(&self) -> usize {
        self.bytes_inflight
    }

    /// True while bytes are awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        self.bytes_inflight > 0
    }

    /// True while the reliable in-flight map is non-empty; `drain` spins on
    /// this.
    pub fn has_reliable_inflight(&self) -> bool {
        !self.rel.inflight.is_empty()
    }

    /// Current RTO derived from SRTT/RTTVAR, clamped below by `min_rto`.
    pub fn current_rto(&self) -> u32 {
        let srtt = match self.srtt {
            Some(srtt) => srtt,
            None => return self.default_rto,
        };
        let var = self.rttvar.unwrap_or(0.0);
        let rto = srtt + (4.0 * var).max(1.0);
        (rto as u32).max(self.min_rto)
    }

    /// Snapshot of RTT/RTO state and transmission counters.
    pub fn metrics(&self) -> SenderMetrics {
        let rtt_avg_ms = if self.rtt_cnt > 0 {
            Some((self.rtt_sum / self.rtt_cnt as f64) as u32)
        } else {
            None
        };

        let mut duration_s = 0.0;
        let mut throughput_bytes_per_sec = None;
        if let (Some(start), Some(end)) = (self.start_time_ms, self.end_time_ms) {
            duration_s = (f64::from(end.saturating_sub(start)) / 1000.0).max(1e-6);
            throughput_bytes_per_sec = Some(self.total_bytes_sent as f64 / duration_s);
        }

        SenderMetrics {
            srtt_ms: self.srtt.map(|v| v as u32),
            rttvar_ms: self.rttvar.map(|v| v as u32),
            rto_current_ms: self.current_rto(),
            rtt_min_ms: self.rtt_min,
            rtt_max_ms: self.rtt_max,
            rtt_avg_ms,
            rtt_samples_ms_last: self.rtt_samples.iter().copied().collect(),
            retransmits: self.retx_total,
            inflight_bytes: self.bytes_inflight,
            segments_inflight: self.rel.inflight.values().filter(|s| !s.acked).count(),
            segments_sent_reliable: self.sent_rel_segments,
            segments_sent_unreliable: self.sent_unrel_segments,
            total_packets_sent: self.total_packets_sent,
            total_packets_received: self.total_packets_received,
            total_bytes_sent: self.total_bytes_sent,
            duration_s,
            throughput_bytes_per_sec,
        }
    }

    /// Mark every reliable segment fully covered by the cumulative ack.
    fn ack_up_to(&mut self, up_to: u32) {
        for seg in self.rel.inflight.values_mut() {
            if seg.end <= up_to {
                seg.acked = true;
            }
        }
        if up_to > self.rel.base_seq {
            self.rel.base_seq = up_to;
        }
    }

    /// Mark every reliable segment overlapping `[start, end)`.
    fn ack_range(&mut self, start: u32, end: u32) {
        for seg in self.rel.inflight.values_mut() {
            if seg.acked {
                continue;
            }
            if seg.seq >= end || seg.end <= start {
                continue;
            }
            seg.acked = true;
        }
    }

    /// Take an RTT sample per Karn's rule: only a segment whose last (and
    /// only) transmission matches the echoed timestamp may contribute.
    fn maybe_update_rtt(&mut self, ts_echo: u32) {
        if ts_echo == 0 {
            return;
        }

        let matched = self
            .rel
            .inflight
            .values()
            .any(|seg| seg.sent_ts == ts_echo && seg.retx_count == 0);
        if !matched {
            return;
        }

        let now = self.clock.now_ms();
        let sample = now.saturating_sub(ts_echo).max(1);

        self.rtt_cnt += 1;
        self.rtt_sum += f64::from(sample);
        self.rtt_min = Some(self.rtt_min.map_or(sample, |m| m.min(sample)));
        self.rtt_max = Some(self.rtt_max.map_or(sample, |m| m.max(sample)));
        if self.rtt_samples.len() == RTT_SAMPLE_WINDOW {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(sample);

        match self.srtt {
            None => {
                self.srtt = Some(f64::from(sample));
                self.rttvar = Some(f64::from(sample) / 2.0);
            }
            Some(srtt) => {
                let rttvar = self.rttvar.unwrap_or(0.0);
                self.rttvar =
                    Some((1.0 - RTO_BETA) * rttvar + RTO_BETA * (srtt - f64::from(sample)).abs());
                self.srtt = Some((1.0 - RTO_ALPHA) * srtt + RTO_ALPHA * f64::from(sample));
            }
        }

        // Untouched segments inherit the refined timeout; backed-off ones
        // keep their doubled values.
        let rto = self.current_rto();
        for seg in self.rel.inflight.values_mut() {
            if seg.retx_count == 0 {
                seg.rto_ms = rto;
            }
        }
    }
}

/// Point-in-time view of the sender's RTT estimator and counters.
#[derive(Debug, Clone)]
pub struct SenderMetrics {
    pub srtt_ms: Option<u32>,
    pub rttvar_ms: Option<u32>,
    pub rto_current_ms: u32,
    pub rtt_min_ms: Option<u32>,
    pub rtt_max_ms: Option<u32>,
    pub rtt_avg_ms: Option<u32>,
    pub rtt_samples_ms_last: Vec<u32>,
    pub retransmits: u64,
    pub inflight_bytes: usize,
    pub segments_inflight: usize,
    pub segments_sent_reliable: u64,
    pub segments_sent_unreliable: u64,
    pub total_packets_sent: u64,
    pub total_packets_received: u64,
    pub total_bytes_sent: u64,
    pub duration_s: f64,
    pub throughput_bytes_per_sec: Option<f64>,
}

/// makes SenderMetrics printable
impl fmt::Display for SenderMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            match v {
                Some(v) => v.to_string(),
                None => "none".to_string(),
            }
        }

        write!(
            f,
            "srtt_ms={}, rttvar_ms={}, rto_current_ms={}, rtt_min_ms={}, rtt_max_ms={}, \
             rtt_avg_ms={}, retransmits={}, inflight_bytes={}, segments_inflight={}, \
             segments_sent_reliable={}, segments_sent_unreliable={}, total_packets_sent={}, \
             total_packets_received={}, total_bytes_sent={}, duration_s={:.3}, \
             throughput_bytes_per_sec={}",
            opt(&self.srtt_ms),
            opt(&self.rttvar_ms),
            self.rto_current_ms,
            opt(&self.rtt_min_ms),
            opt(&self.rtt_max_ms),
            opt(&self.rtt_avg_ms),
            self.retransmits,
            self.inflight_bytes,
            self.segments_inflight,
            self.segments_sent_reliable,
            self.segments_sent_unreliable,
            self.total_packets_sent,
            self.total_packets_received,
            self.total_bytes_sent,
            self.duration_s,
            opt(&self.throughput_bytes_per_sec.map(|v| format!("{v:.2}"))),
        )
    }
}
