//! The [`Packetizer`] trait shared by the H.264, H.265 and AAC producers.
//! Each access unit turns into an ordered list of complete
//! RTP packets — 12-byte header (sequence/SSRC left at zero, see
//! [`crate::rtp::header`]) followed by the payload for that packet.

/// Default MTU payload budget: 1400 bytes of link MTU minus 28 bytes for
/// IP/UDP/RTP headers.
pub const DEFAULT_MTU_PAYLOAD: usize = 1400 - 28;

/// One packetized access unit: the produced RTP packets plus the total
/// payload bytes fed in (for `octet_count` accounting).
pub struct PacketizedUnit {
    pub packets: Vec<Vec<u8>>,
    pub payload_bytes: usize,
}

/// Codec-specific RTP packetizer.
pub trait Packetizer: Send + Sync {
    /// Turn one access unit into RTP packets stamped with `timestamp`.
    /// The caller (the track/sink) is responsible for patching in the
    /// per-connection sequence number and SSRC before sending.
    fn packetize(&self, timestamp: u32, access_unit: &[&[u8]]) -> PacketizedUnit;

    /// RTP payload type assigned to this track.
    fn payload_type(&self) -> u8;

    /// RTP clock rate in Hz, for the `a=rtpmap` line.
    fn clock_rate(&self) -> u32;

    /// `a=rtpmap` codec token, e.g. `H264`, `H265`, `MPEG4-GENERIC`.
    fn rtpmap_name(&self) -> String;
}
