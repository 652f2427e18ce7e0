//! Track abstraction: a uniform capability the
//! dialog engine and the feed API use regardless of codec.

use tokio::sync::RwLock;

use crate::rtp::aac::AacPacketizer;
use crate::rtp::h264::{self, H264Packetizer};
use crate::rtp::h265::{self, H265Packetizer};
use crate::rtp::{PacketizedUnit, Packetizer};

/// Track identifier. This server always assigns video id 0 and audio id 1.
pub const VIDEO_TRACK_ID: u8 = 0;
pub const AUDIO_TRACK_ID: u8 = 1;

pub enum MediaType {
    Video,
    Audio,
}

/// Out-of-band codec configuration. Must be set before
/// [`Track::is_ready`] becomes true.
#[derive(Debug, Clone)]
pub enum ParameterSets {
    H264 {
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    H265 {
        vps: Vec<u8>,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Aac {
        config: Vec<u8>,
    },
}

enum Codec {
    H264,
    H265,
    Aac { channels: u8 },
}

/// One media track: codec, payload type, readiness, SDP fragment
/// producer and RTP-packet producer.
pub struct Track {
    pub id: u8,
    pub media_type: MediaType,
    codec: Codec,
    packetizer: Box<dyn Packetizer>,
    params: RwLock<Option<ParameterSets>>,
}

impl Track {
    pub fn new_h264(id: u8, payload_type: u8) -> Self {
        Track {
            id,
            media_type: MediaType::Video,
            codec: Codec::H264,
            packetizer: Box::new(H264Packetizer::new(payload_type)),
            params: RwLock::new(None),
        }
    }

    pub fn new_h265(id: u8, payload_type: u8) -> Self {
        Track {
            id,
            media_type: MediaType::Video,
            codec: Codec::H265,
            packetizer: Box::new(H265Packetizer::new(payload_type)),
            params: RwLock::new(None),
        }
    }

    pub fn new_aac(id: u8, payload_type: u8, sample_rate: u32, channels: u8) -> Self {
        Track {
            id,
            media_type: MediaType::Audio,
            codec: Codec::Aac { channels },
            packetizer: Box::new(AacPacketizer::new(payload_type, sample_rate, channels)),
            params: RwLock::new(None),
        }
    }

    pub fn payload_type(&self) -> u8 {
        self.packetizer.payload_type()
    }

    /// Replace this track's parameter sets. Must be called before the
    /// track is considered ready; calling it again after a connection
    /// has already DESCRIBEd is allowed but the effect on
    /// already-served SDP is undefined by design — we simply serve
    /// whatever is current at the next DESCRIBE.
    pub async fn set_parameter_sets(&self, params: ParameterSets) {
        *self.params.write().await = Some(params);
    }

    pub async fn is_ready(&self) -> bool {
        self.params.read().await.is_some()
    }

    /// Packetize one access unit at the given RTP timestamp.
    /// Sequence number and SSRC are left at zero; the fan-out loop
    /// patches those in per connection.
    pub fn packetize(&self, timestamp: u32, access_unit: &[&[u8]]) -> PacketizedUnit {
        self.packetizer.packetize(timestamp, access_unit)
    }

    fn rtpmap_line(&self) -> String {
        let pt = self.packetizer.payload_type();
        let name = self.packetizer.rtpmap_name();
        let rate = self.packetizer.clock_rate();
        match self.codec {
            Codec::Aac { channels } => format!("a=rtpmap:{} {}/{}/{}", pt, name, rate, channels),
            _ => format!("a=rtpmap:{} {}/{}", pt, name, rate),
        }
    }

    async fn fmtp_line(&self) -> Option<String> {
        let pt = self.packetizer.payload_type();
        let params = self.params.read().await;
        let params = params.as_ref()?;
        let body = match (&self.codec, params) {
            (Codec::H264, ParameterSets::H264 { sps, pps }) => h264::fmtp(sps, pps),
            (Codec::H265, ParameterSets::H265 { vps, sps, pps }) => h265::fmtp(vps, sps, pps),
            (Codec::Aac { .. }, ParameterSets::Aac { config }) => {
                crate::rtp::aac::fmtp(config)
            }
            _ => return None,
        };
        Some(format!("a=fmtp:{} {}", pt, body))
    }

    fn media_token(&self) -> &'static str {
        match self.media_type {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }

    /// Build this track's SDP media block: `m=`, `a=control`,
    /// `a=rtpmap`, and (if parameter sets are present) `a=fmtp`.
    pub async fn sdp_fragment(&self) -> String {
        let mut lines = vec![
            format!("m={} 0 RTP/AVP {}", self.media_token(), self.payload_type()),
            format!("a=control:trackID={}", self.id),
            self.rtpmap_line(),
        ];
        if let Some(fmtp) = self.fmtp_line().await {
            lines.push(fmtp);
        }
        lines.join("\n") + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_ready_until_parameter_sets_set() {
        let t = Track::new_h264(VIDEO_TRACK_ID, 96);
        assert!(!t.is_ready().await);
        t.set_parameter_sets(ParameterSets::H264 {
            sps: vec![0x67, 1, 2],
            pps: vec![0x68, 3],
        })
        .await;
        assert!(t.is_ready().await);
    }

    #[tokio::test]
    async fn sdp_fragment_includes_fmtp_once_ready() {
        let t = Track::new_h264(VIDEO_TRACK_ID, 96);
        let frag = t.sdp_fragment().await;
        assert!(frag.contains("m=video 0 RTP/AVP 96"));
        assert!(frag.contains("a=control:trackID=0"));
        assert!(!frag.contains("a=fmtp"));

        t.set_parameter_sets(ParameterSets::H264 {
            sps: vec![0x67, 1, 2],
            pps: vec![0x68, 3],
        })
        .await;
        let frag = t.sdp_fragment().await;
        assert!(frag.contains("a=fmtp:96 packetization-mode=1"));
    }

    #[tokio::test]
    async fn aac_rtpmap_includes_channels() {
        let t = Track::new_aac(AUDIO_TRACK_ID, 97, 44100, 2);
        let frag = t.sdp_fragment().await;
        assert!(frag.contains("a=rtpmap:97 MPEG4-GENERIC/44100/2"));
    }
}
