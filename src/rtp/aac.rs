//! AAC RTP packetization, MPEG4-GENERIC / AU-header section (RFC 3640).
//!
//! One access unit (one AAC frame) becomes exactly one RTP packet: a
//! 4-byte AU-header section (2-byte headers-length-in-bits, fixed at 16,
//! followed by one 2-byte AU-header) followed by the raw AAC payload.

use super::header::{self, HEADER_LEN};
use super::packetizer::{PacketizedUnit, Packetizer};

/// AU-header-length field value: one 16-bit AU-header follows (in bits).
const AU_HEADERS_LENGTH_BITS: u16 = 16;

pub struct AacPacketizer {
    payload_type: u8,
    sample_rate: u32,
    channels: u8,
}

impl AacPacketizer {
    pub fn new(payload_type: u8, sample_rate: u32, channels: u8) -> Self {
        AacPacketizer {
            payload_type,
            sample_rate,
            channels,
        }
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&self, timestamp: u32, access_unit: &[&[u8]]) -> PacketizedUnit {
        let payload_bytes: usize = access_unit.iter().map(|s| s.len()).sum();
        if payload_bytes == 0 {
            return PacketizedUnit {
                packets: Vec::new(),
                payload_bytes: 0,
            };
        }

        // AU-header = frame size (13 bits) << 3 | AU-index (3 bits, always 0).
        let au_header: u16 = ((payload_bytes as u16) & 0x1FFF) << 3;

        let header = header::write_header(self.payload_type, true, timestamp);
        let mut packet = Vec::with_capacity(HEADER_LEN + 4 + payload_bytes);
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&AU_HEADERS_LENGTH_BITS.to_be_bytes());
        packet.extend_from_slice(&au_header.to_be_bytes());
        for chunk in access_unit {
            packet.extend_from_slice(chunk);
        }

        PacketizedUnit {
            packets: vec![packet],
            payload_bytes,
        }
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn rtpmap_name(&self) -> String {
        "MPEG4-GENERIC".to_string()
    }
}

/// `a=fmtp` parameters for an AAC track: `config=<AudioSpecificConfig hex>`
/// plus the fixed MPEG4-GENERIC AU-header parameters.
pub fn fmtp(audio_specific_config: &[u8]) -> String {
    let config_hex = audio_specific_config
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    format!(
        "profile-level-id=1;mode=AAC-hbr;sizeLength=13;indexLength=3;indexDeltaLength=3;config={}",
        config_hex
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_au_becomes_one_packet_with_au_header_prefix() {
        let p = AacPacketizer::new(97, 44100, 2);
        let au = [0xAAu8, 0xBB, 0xCC];
        let unit = p.packetize(500, &[&au]);

        assert_eq!(unit.packets.len(), 1);
        assert_eq!(unit.payload_bytes, 3);

        let pkt = &unit.packets[0];
        assert_eq!(pkt[1] & 0x80, 0x80); // marker always set
        let headers_len_bits = u16::from_be_bytes([pkt[HEADER_LEN], pkt[HEADER_LEN + 1]]);
        assert_eq!(headers_len_bits, 16);

        let au_header = u16::from_be_bytes([pkt[HEADER_LEN + 2], pkt[HEADER_LEN + 3]]);
        assert_eq!(au_header >> 3, 3); // frame size
        assert_eq!(au_header & 0x7, 0); // AU index

        assert_eq!(&pkt[HEADER_LEN + 4..], &au);
    }

    #[test]
    fn empty_au_produces_no_packets() {
        let p = AacPacketizer::new(97, 44100, 2);
        let unit = p.packetize(0, &[&[]]);
        assert!(unit.packets.is_empty());
    }

    #[test]
    fn rtpmap_and_clock_rate() {
        let p = AacPacketizer::new(97, 48000, 1);
        assert_eq!(p.rtpmap_name(), "MPEG4-GENERIC");
        assert_eq!(p.clock_rate(), 48000);
        assert_eq!(p.channels(), 1);
    }

    #[test]
    fn fmtp_includes_hbr_mode_and_config_hex() {
        let line = fmtp(&[0x12, 0x10]);
        assert!(line.contains("mode=AAC-hbr"));
        assert!(line.contains("sizeLength=13"));
        assert!(line.contains("config=1210"));
    }
}
