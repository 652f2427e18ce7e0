//! Minimal demo: serves a static, synthetic H.264 + AAC stream so the
//! RTSP dialog and RTP fan-out can be exercised end to end with a real
//! client (e.g. `ffplay rtsp://127.0.0.1:8554/stream`).
//!
//! Encoding, demuxing, and reading from a real capture device are out
//! of scope for this crate; the "frames" fed here
//! are fixed byte patterns, not a valid decodable stream.

use std::time::Duration;

use rtsp_media_server::track::{ParameterSets, Track, AUDIO_TRACK_ID, VIDEO_TRACK_ID};
use rtsp_media_server::{Server, ServerConfig};

const VIDEO_CLOCK_RATE: u32 = 90_000;
const AUDIO_CLOCK_RATE: u32 = 44_100;
const FRAME_INTERVAL: Duration = Duration::from_millis(40); // 25 fps

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ServerConfig {
        listen_addr: "0.0.0.0:8554".parse()?,
        ..ServerConfig::default()
    };
    let server = Server::new(config);

    let video_track = Track::new_h264(VIDEO_TRACK_ID, 96);
    video_track
        .set_parameter_sets(ParameterSets::H264 {
            sps: vec![0x67, 0x42, 0x00, 0x1f, 0x96, 0x54, 0x05, 0x01, 0xe9],
            pps: vec![0x68, 0xce, 0x3c, 0x80],
        })
        .await;
    server.add_video_track(video_track).await;

    let audio_track = Track::new_aac(AUDIO_TRACK_ID, 97, AUDIO_CLOCK_RATE, 2);
    audio_track
        .set_parameter_sets(ParameterSets::Aac {
            config: vec![0x12, 0x10], // AAC-LC, 44.1 kHz, stereo
        })
        .await;
    server.add_audio_track(audio_track).await;

    server.clone().start_listen().await?;

    let mut video_timestamp: u32 = 0;
    let mut audio_timestamp: u32 = 0;
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);

    loop {
        ticker.tick().await;

        let nal = [0x65u8, 0, 0, 0]; // placeholder IDR slice
        server.feed_video(video_timestamp, &[&nal]).await;
        video_timestamp = video_timestamp.wrapping_add(VIDEO_CLOCK_RATE / 25);

        let au = [0u8; 32]; // placeholder AAC access unit
        server.feed_audio(audio_timestamp, &au).await;
        audio_timestamp = audio_timestamp.wrapping_add(AUDIO_CLOCK_RATE / 25);
    }
}
