use std::fmt;

/// PacketType is the frame kind carried in the first byte of the base
/// header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacketType(pub(crate) u8);

pub const PT_DATA: PacketType = PacketType(1);
pub const PT_ACK: PacketType = PacketType(2);
pub const PT_SACK: PacketType = PacketType(3);
pub const PT_CTRL: PacketType = PacketType(4);

/// makes PacketType printable
impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let others = format!("Unknown PacketType: {}", self.0);
        let s = match *self {
            PT_DATA => "DATA",
            PT_ACK => "ACK",
            PT_SACK => "SACK",
            PT_CTRL => "CTRL",
            _ => others.as_str(),
        };
        write!(f, "{s}")
    }
}

/// ChannelType selects between the two logical channels and is carried in
/// the second byte of the base header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelType(pub(crate) u8);

pub const CH_UNRELIABLE: ChannelType = ChannelType(0);
pub const CH_RELIABLE: ChannelType = ChannelType(1);

/// makes ChannelType printable
impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let others = format!("Unknown ChannelType: {}", self.0);
        let s = match *self {
            CH_UNRELIABLE => "UNRELIABLE",
            CH_RELIABLE => "RELIABLE",
            _ => others.as_str(),
        };
        write!(f, "{s}")
    }
}

/// One SACK block as a half-open byte range `[start, end)`.
///
/// `start < end` must hold; the receiver reports blocks strictly above its
/// cumulative ack point.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SackBlock {
    pub start: u32,
    pub end: u32,
}

/// makes SackBlock printable
impl fmt::Display for SackBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
