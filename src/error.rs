use std::io;

use thiserror::Error;

use crate::packet::PacketType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("frame too short: {have} < {need}")]
    ErrFrameTooShort { have: usize, need: usize },
    #[error("unknown packet type: {typ}")]
    ErrUnknownPacketType { typ: u8 },
    #[error("unknown channel type: {value}")]
    ErrUnknownChannelType { value: u8 },
    #[error("payload too large: {len} > {max}")]
    ErrPayloadTooLarge { len: usize, max: usize },
    #[error("{typ} frame must have len == 0")]
    ErrControlFrameLenNonZero { typ: PacketType },
    #[error("truncated {what}: need {need}, have {have}")]
    ErrTruncated {
        what: &'static str,
        need: usize,
        have: usize,
    },
    #[error("SACK reserved byte must be 0")]
    ErrSackReservedNonZero,
    #[error("too many SACK blocks: {cnt} > {max}")]
    ErrTooManySackBlocks { cnt: usize, max: usize },
    #[error("SACK block invalid range: [{start}, {end})")]
    ErrSackBlockInvalidRange { start: u32, end: u32 },
    #[error("length mismatch: expected {expected} bytes, actual {actual}")]
    ErrLengthMismatch { expected: usize, actual: usize },
    #[error("checksum mismatch")]
    ErrChecksumMismatch,

    #[error("on_data expects DATA packets")]
    ErrNotDataPacket,

    #[error("IoError: {0}")]
    Io(#[from] io::Error),
}
