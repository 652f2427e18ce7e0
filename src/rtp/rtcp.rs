//! RTCP Sender Report (RFC 3550 §6.4.1), zero report blocks, 28 bytes.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
const NTP_UNIX_EPOCH_OFFSET_SECS: u64 = 2_208_988_800;

pub const SENDER_REPORT_LEN: usize = 28;

/// Build a Sender Report with the wall-clock split into NTP seconds/fraction.
pub fn build_sender_report(
    ssrc: u32,
    ntp_secs: u32,
    ntp_frac: u32,
    rtp_timestamp: u32,
    packet_count: u32,
    octet_count: u32,
) -> [u8; SENDER_REPORT_LEN] {
    let mut sr = [0u8; SENDER_REPORT_LEN];

    // RTCP common header (RFC 3550 §6.4.1): V=2, P=0, RC=0, PT=200 (SR),
    // length = (wordCount - 1) = 6 for a 28-byte packet.
    sr[0] = 2 << 6;
    sr[1] = 200;
    sr[2..4].copy_from_slice(&6u16.to_be_bytes());

    sr[4..8].copy_from_slice(&ssrc.to_be_bytes());
    sr[8..12].copy_from_slice(&ntp_secs.to_be_bytes());
    sr[12..16].copy_from_slice(&ntp_frac.to_be_bytes());
    sr[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    sr[20..24].copy_from_slice(&packet_count.to_be_bytes());
    sr[24..28].copy_from_slice(&octet_count.to_be_bytes());

    sr
}

/// Build a Sender Report stamped with the current wall-clock time.
pub fn build_sender_report_now(
    ssrc: u32,
    rtp_timestamp: u32,
    packet_count: u32,
    octet_count: u32,
) -> [u8; SENDER_REPORT_LEN] {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ntp_secs = now.as_secs().wrapping_add(NTP_UNIX_EPOCH_OFFSET_SECS) as u32;
    // frac = fractional_seconds * 2^32, approximated from nanoseconds.
    let ntp_frac = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;

    build_sender_report(
        ssrc,
        ntp_secs,
        ntp_frac as u32,
        rtp_timestamp,
        packet_count,
        octet_count,
    )
}
