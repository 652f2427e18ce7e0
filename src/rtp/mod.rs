//! Wire codecs and packetizers for the RTP/RTCP transport.

pub mod aac;
pub mod h264;
pub mod h265;
pub mod header;
pub mod packetizer;
pub mod rtcp;

pub use packetizer::{PacketizedUnit, Packetizer, DEFAULT_MTU_PAYLOAD};
