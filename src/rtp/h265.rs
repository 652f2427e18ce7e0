//! H.265/HEVC RTP packetization (RFC 7798): single-NAL and FU fragmentation.
//!
//! Mirrors [`crate::rtp::h264`] but with HEVC's 2-byte NAL header and the
//! payload-type-49 fragmentation-unit layout.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::header::{self, HEADER_LEN};
use super::packetizer::{PacketizedUnit, Packetizer, DEFAULT_MTU_PAYLOAD};

pub struct H265Packetizer {
    payload_type: u8,
    mtu_payload: usize,
}

impl H265Packetizer {
    pub fn new(payload_type: u8) -> Self {
        H265Packetizer {
            payload_type,
            mtu_payload: DEFAULT_MTU_PAYLOAD,
        }
    }

    pub fn with_mtu(payload_type: u8, mtu_payload: usize) -> Self {
        H265Packetizer {
            payload_type,
            mtu_payload,
        }
    }

    fn packetize_nal(&self, timestamp: u32, nal: &[u8], marker: bool, out: &mut Vec<Vec<u8>>) {
        if nal.len() < 2 {
            return;
        }

        if nal.len() <= self.mtu_payload {
            let header = header::write_header(self.payload_type, marker, timestamp);
            let mut packet = Vec::with_capacity(HEADER_LEN + nal.len());
            packet.extend_from_slice(&header);
            packet.extend_from_slice(nal);
            out.push(packet);
            return;
        }

        // HEVC NAL header is 2 bytes: F(1) Type(6) LayerId(6) TID(3).
        let orig_nal_header = u16::from_be_bytes([nal[0], nal[1]]);
        let nal_unit_type = ((orig_nal_header >> 9) & 0x3F) as u8;
        let body = &nal[2..];

        let max_fragment = self.mtu_payload.saturating_sub(3).max(1);
        let mut offset = 0usize;
        let mut start = true;

        while offset < body.len() {
            let remaining = body.len() - offset;
            let chunk_len = remaining.min(max_fragment);
            let end = remaining == chunk_len;
            let chunk = &body[offset..offset + chunk_len];

            // FU indicator (2 bytes): original header with Type replaced by 49 (FU).
            let fu_indicator = (orig_nal_header & 0x81FF) | (49u16 << 9);
            let fu_header = ((start as u8) << 7) | ((end as u8) << 6) | (nal_unit_type & 0x3F);

            let is_last_packet_of_au = marker && end;
            let header = header::write_header(self.payload_type, is_last_packet_of_au, timestamp);

            let mut packet = Vec::with_capacity(HEADER_LEN + 3 + chunk.len());
            packet.extend_from_slice(&header);
            packet.extend_from_slice(&fu_indicator.to_be_bytes());
            packet.push(fu_header);
            packet.extend_from_slice(chunk);
            out.push(packet);

            offset += chunk_len;
            start = false;
        }
    }
}

impl Packetizer for H265Packetizer {
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
        "H265".to_string()
    }
}

/// `a=fmtp` parameters for an H.265 track: `sprop-vps`/`sprop-sps`/`sprop-pps`.
pub fn fmtp(vps: &[u8], sps: &[u8], pps: &[u8]) -> String {
    format!(
        "sprop-vps={};sprop-sps={};sprop-pps={}",
        BASE64_STANDARD.encode(vps),
        BASE64_STANDARD.encode(sps),
        BASE64_STANDARD.encode(pps)
    )
}
