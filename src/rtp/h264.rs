//! H.264 RTP packetization (RFC 6184): single-NAL and FU-A fragmentation.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::header::{self, HEADER_LEN};
use super::packetizer::{PacketizedUnit, Packetizer, DEFAULT_MTU_PAYLOAD};

pub struct H264Packetizer {
    payload_type: u8,
    mtu_payload: usize,
}

impl H264Packetizer {
    pub fn new(payload_type: u8) -> Self {
        H264Packetizer {
            payload_type,
            mtu_payload: DEFAULT_MTU_PAYLOAD,
        }
    }

    pub fn with_mtu(payload_type: u8, mtu_payload: usize) -> Self {
        H264Packetizer {
            payload_type,
            mtu_payload,
        }
    }

    /// Packetize a single NAL unit, appending its RTP packets to `out`.
    /// `marker` is set on the final RTP packet produced for this NAL.
    fn packetize_nal(&self, timestamp: u32, nal: &[u8], marker: bool, out: &mut Vec<Vec<u8>>) {
        if nal.is_empty() {
            return;
        }

        if nal.len() <= self.mtu_payload {
            // Single NAL Unit packet (RFC 6184 §5.6).
            let header = header::write_header(self.payload_type, marker, timestamp);
            let mut packet = Vec::with_capacity(HEADER_LEN + nal.len());
            packet.extend_from_slice(&header);
            packet.extend_from_slice(nal);
            out.push(packet);
            return;
        }

        // FU-A fragmentation (RFC 6184 §5.8).
        let nal_header = nal[0];
        let fu_indicator = (nal_header & 0xE0) | 28;
        let nal_type = nal_header & 0x1F;
        let body = &nal[1..];

        let max_fragment = self.mtu_payload.saturating_sub(2).max(1);
        let mut offset = 0usize;
        let mut start = true;

        while offset < body.len() {
            let remaining = body.len() - offset;
            let chunk_len = remaining.min(max_fragment);
            let end = remaining == chunk_len;
            let chunk = &body[offset..offset + chunk_len];

            let fu_header = ((start as u8) << 7) | ((end as u8) << 6) | nal_type;
            let is_last_packet_of_au = marker && end;
            let header = header::write_header(self.payload_type, is_last_packet_of_au, timestamp);

            let mut packet = Vec::with_capacity(HEADER_LEN + 2 + chunk.len());
            packet.extend_from_slice(&header);
            packet.push(fu_indicator);
            packet.push(fu_header);
            packet.extend_from_slice(chunk);
            out.push(packet);

            offset += chunk_len;
            start = false;
        }
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&self, timestamp: u32, access_unit: &[&[u8]]) -> PacketizedUnit {
        let mut packets = Vec::new();
        let mut payload_bytes = 0usize;
        let last_index = access_unit.len().saturating_sub(1);

        for (i, nal) in access_unit.iter().enumerate() {
            payload_bytes += nal.len();
            self.packetize_nal(timestamp, nal, i == last_index, &mut packets);
        }

        PacketizedUnit {
            packets,
            payload_bytes,
        }
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn clock_rate(&self) -> u32 {
        90_000
    }

    fn rtpmap_name(&self) -> String {
        "H264".to_string()
    }
}

/// `a=fmtp` parameters for an H.264 track: `sprop-parameter-sets`
/// base64-encoding SPS and PPS, comma-separated (RFC 6184 §8.2.1).
pub fn fmtp(sps: &[u8], pps: &[u8]) -> String {
    format!(
        "packetization-mode=1;sprop-parameter-sets={},{}",
        BASE64_STANDARD.encode(sps),
        BASE64_STANDARD.encode(pps)
    )
}
