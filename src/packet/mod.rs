
mod packet_type;

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use packet_type::{
    ChannelType, PacketType, SackBlock, CH_RELIABLE, CH_UNRELIABLE, PT_ACK, PT_CTRL, PT_DATA,
    PT_SACK,
};

use crate::error::{Error, Result};
use crate::util::internet_checksum;

/// Size of the base header shared by all frame kinds.
pub const BASE_LEN: usize = 14;
/// Size of the ACK extras appended to ACK and SACK frames.
pub const ACK_LEN: usize = 10;
/// Size of the SACK block-count header.
pub const SACK_HDR_LEN: usize = 2;
/// Hard cap on a DATA payload; segments are normally bounded by the much
/// smaller MSS.
pub const MAX_PAYLOAD: usize = 1400;
/// Hard cap on the number of SACK blocks in one frame.
pub const MAX_SACK_BLOCKS: usize = 32;

/// Packet represents a DCTP wire frame.
///
/// All integers are big-endian. Every frame starts with the 14-byte base
/// header:
///
///```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|     Type      | Channel Type  |        Sequence Number        |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+          (cont.)              |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                        Send Timestamp                         |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|        Payload Length         |           Checksum            |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///```
///
/// ACK and SACK frames append `ack: u32 | rcv_wnd: u16 | ts_echo: u32`;
/// SACK frames additionally append `block_cnt: u8 | reserved: u8` followed
/// by `block_cnt` pairs of `start: u32, end: u32`. DATA frames append the
/// payload. The checksum is the 16-bit Internet checksum over the whole
/// frame with the checksum field zeroed.
///
/// Each variant carries only the fields its wire form has, so illegal
/// combinations (payload on a control frame) are unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Data {
        channel: ChannelType,
        seq: u32,
        ts_send: u32,
        payload: Bytes,
    },
    Ack {
        channel: ChannelType,
        seq: u32,
        ts_send: u32,
        ack: u32,
        rcv_wnd: u16,
        ts_echo: u32,
    },
    Sack {
        channel: ChannelType,
        seq: u32,
        ts_send: u32,
        ack: u32,
        rcv_wnd: u16,
        ts_echo: u32,
        blocks: Vec<SackBlock>,
    },
    Ctrl {
        channel: ChannelType,
        seq: u32,
        ts_send: u32,
    },
}

/// makes Packet printable
impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Data {
                channel,
                seq,
                ts_send,
                payload,
            } => write!(
                f,
                "DATA ch={channel} seq={seq} ts={ts_send} len={}",
                payload.len()
            ),
            Packet::Ack {
                channel,
                ack,
                rcv_wnd,
                ts_echo,
                ..
            } => write!(f, "ACK ch={channel} ack={ack} wnd={rcv_wnd} tsEcho={ts_echo}"),
            Packet::Sack {
                channel,
                ack,
                rcv_wnd,
                ts_echo,
                blocks,
                ..
            } => {
                write!(f, "SACK ch={channel} ack={ack} wnd={rcv_wnd} tsEcho={ts_echo}")?;
                for blk in blocks {
                    write!(f, " {blk}")?;
                }
                Ok(())
            }
            Packet::Ctrl {
                channel,
                seq,
                ts_send,
            } => write!(f, "CTRL ch={channel} seq={seq} ts={ts_send}"),
        }
    }
}

impl Packet {
    pub fn typ(&self) -> PacketType {
        match self {
            Packet::Data { .. } => PT_DATA,
            Packet::Ack { .. } => PT_ACK,
            Packet::Sack { .. } => PT_SACK,
            Packet::Ctrl { .. } => PT_CTRL,
        }
    }

    pub fn channel(&self) -> ChannelType {
        match self {
            Packet::Data { channel, .. }
            | Packet::Ack { channel, .. }
            | Packet::Sack { channel, .. }
            | Packet::Ctrl { channel, .. } => *channel,
        }
    }

    pub fn seq(&self) -> u32 {
        match self {
            Packet::Data { seq, .. }
            | Packet::Ack { seq, .. }
            | Packet::Sack { seq, .. }
            | Packet::Ctrl { seq, .. } => *seq,
        }
    }

    pub fn ts_send(&self) -> u32 {
        match self {
            Packet::Data { ts_send, .. }
            | Packet::Ack { ts_send, .. }
            | Packet::Sack { ts_send, .. }
            | Packet::Ctrl { ts_send, .. } => *ts_send,
        }
    }

    /// Serialize into a wire frame, computing the checksum last.
    pub fn marshal(&self) -> Result<Bytes> {
        let mut extras = BytesMut::new();
        let payload = match self {
            Packet::Data { payload, .. } => {
                if payload.len() > MAX_PAYLOAD {
                    return Err(Error::ErrPayloadTooLarge {
                        len: payload.len(),
                        max: MAX_PAYLOAD,
                    });
                }
                payload.clone()
            }
            Packet::Ack {
                ack,
                rcv_wnd,
                ts_echo,
                ..
            } => {
                extras.put_u32(*ack);
                extras.put_u16(*rcv_wnd);
                extras.put_u32(*ts_echo);
                Bytes::new()
            }
            Packet::Sack {
                ack,
                rcv_wnd,
                ts_echo,
                blocks,
                ..
            } => {
                if blocks.len() > MAX_SACK_BLOCKS {
                    return Err(Error::ErrTooManySackBlocks {
                        cnt: blocks.len(),
                        max: MAX_SACK_BLOCKS,
                    });
                }
                for blk in blocks {
                    if blk.start >= blk.end {
                        return Err(Error::ErrSackBlockInvalidRange {
                            start: blk.start,
                            end: blk.end,
                        });
                    }
                }
                extras.put_u32(*ack);
                extras.put_u16(*rcv_wnd);
                extras.put_u32(*ts_echo);
                extras.put_u8(blocks.len() as u8);
                extras.put_u8(0);
                for blk in blocks {
                    extras.put_u32(blk.start);
                    extras.put_u32(blk.end);
                }
                Bytes::new()
            }
            Packet::Ctrl { .. } => Bytes::new(),
        };

        let mut buf = BytesMut::with_capacity(BASE_LEN + extras.len() + payload.len());
        buf.put_u8(self.typ().0);
        buf.put_u8(self.channel().0);
        buf.put_u32(self.seq());
        buf.put_u32(self.ts_send());
        buf.put_u16(payload.len() as u16);
        buf.put_u16(0);
        buf.extend_from_slice(&extras);
        buf.extend_from_slice(&payload);

        let ck = internet_checksum(&[buf.as_ref()]);
        buf[12..14].copy_from_slice(&ck.to_be_bytes());
        Ok(buf.freeze())
    }

    /// Parse a wire frame, validating lengths and the checksum.
    pub fn unmarshal(raw: &Bytes) -> Result<Packet> {
        if raw.len() < BASE_LEN {
            return Err(Error::ErrFrameTooShort {
                have: raw.len(),
                need: BASE_LEN,
            });
        }

        let mut reader = raw.slice(..BASE_LEN);
        let typ = reader.get_u8();
        let channel = reader.get_u8();
        let seq = reader.get_u32();
        let ts_send = reader.get_u32();
        let len = reader.get_u16() as usize;
        let ck = reader.get_u16();

        let channel = match channel {
            0 => CH_UNRELIABLE,
            1 => CH_RELIABLE,
            value => return Err(Error::ErrUnknownChannelType { value }),
        };

        // DATA payload is sliced off after the total-length check; control
        // frames are fully parsed here.
        let mut offs = BASE_LEN;
        let pkt = match PacketType(typ) {
            PT_DATA => None,
            PT_ACK => {
                let (ack, rcv_wnd, ts_echo) = read_ack_section(raw, &mut offs)?;
                if len != 0 {
                    return Err(Error::ErrControlFrameLenNonZero { typ: PT_ACK });
                }
                Some(Packet::Ack {
                    channel,
                    seq,
                    ts_send,
                    ack,
                    rcv_wnd,
                    ts_echo,
                })
            }
            PT_SACK => {
                let (ack, rcv_wnd, ts_echo) = read_ack_section(raw, &mut offs)?;
                if len != 0 {
                    return Err(Error::ErrControlFrameLenNonZero { typ: PT_SACK });
                }

                require_at_least(raw, offs, SACK_HDR_LEN, "SACK header")?;
                let block_cnt = raw[offs] as usize;
                let reserved = raw[offs + 1];
                if reserved != 0 {
                    return Err(Error::ErrSackReservedNonZero);
                }
                offs += SACK_HDR_LEN;

                if block_cnt > MAX_SACK_BLOCKS {
                    return Err(Error::ErrTooManySackBlocks {
                        cnt: block_cnt,
                        max: MAX_SACK_BLOCKS,
                    });
                }

                let need = block_cnt * 8;
                require_at_least(raw, offs, need, "SACK blocks")?;
                let mut r = raw.slice(offs..offs + need);
                let mut blocks = Vec::with_capacity(block_cnt);
                for _ in 0..block_cnt {
                    let start = r.get_u32();
                    let end = r.get_u32();
                    if start >= end {
                        return Err(Error::ErrSackBlockInvalidRange { start, end });
                    }
                    blocks.push(SackBlock { start, end });
                }
                offs += need;

                Some(Packet::Sack {
                    channel,
                    seq,
                    ts_send,
                    ack,
                    rcv_wnd,
                    ts_echo,
                    blocks,
                })
            }
            PT_CTRL => {
                if len != 0 {
                    return Err(Error::ErrControlFrameLenNonZero { typ: PT_CTRL });
                }
                Some(Packet::Ctrl {
                    channel,
                    seq,
                    ts_send,
                })
            }
            _ => return Err(Error::ErrUnknownPacketType { typ }),
        };

        let expected_total = offs + len;
        if raw.len() != expected_total {
            return Err(Error::ErrLengthMismatch {
                expected: expected_total,
                actual: raw.len(),
            });
        }

        // The stored checksum occupies a whole aligned word, so summing
        // around it is equivalent to summing with the field zeroed.
        let expected_ck = internet_checksum(&[&raw[..12], &raw[14..]]);
        if ck != expected_ck {
            return Err(Error::ErrChecksumMismatch);
        }

        match pkt {
            Some(pkt) => Ok(pkt),
            None => Ok(Packet::Data {
                channel,
                seq,
                ts_send,
                payload: raw.slice(raw.len() - len..),
            }),
        }
    }
}

fn read_ack_section(raw: &Bytes, offs: &mut usize) -> Result<(u32, u16, u32)> {
    require_at_least(raw, *offs, ACK_LEN, "ACK section")?;
    let mut r = raw.slice(*offs..*offs + ACK_LEN);
    let ack = r.get_u32();
    let rcv_wnd = r.get_u16();
    let ts_echo = r.get_u32();
    *offs += ACK_LEN;
    Ok((ack, rcv_wnd, ts_echo))
}

fn require_at_least(raw: &Bytes, offs: usize, need: usize, what: &'static str) -> Result<()> {
    let have = raw.len() - offs;
    if have < need {
        return Err(Error::ErrTruncated { what, need, have });
    }
    Ok(())
}
