//! End-to-end RTSP dialog and RTP fan-out tests, driving a real
//! [`Server`] over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rtsp_media_server::auth::Credentials;
use rtsp_media_server::track::{ParameterSets, Track, AUDIO_TRACK_ID, VIDEO_TRACK_ID};
use rtsp_media_server::{Server, ServerConfig};

async fn start_server(credentials: Option<Credentials>) -> (std::sync::Arc<Server>, SocketAddr) {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        credentials,
        ssrc_seed: Some(0x1234_5678),
        ..ServerConfig::default()
    };
    let server = Server::new(config);
    server.clone().start_listen().await.unwrap();
    let addr = server.local_addr();
    (server, addr)
}

async fn attach_ready_tracks(server: &Server) {
    let video = Track::new_h264(VIDEO_TRACK_ID, 96);
    video
        .set_parameter_sets(ParameterSets::H264 {
            sps: vec![0x67, 0x42, 0x00, 0x1f],
            pps: vec![0x68, 0xce],
        })
        .await;
    server.add_video_track(video).await;

    let audio = Track::new_aac(AUDIO_TRACK_ID, 97, 44_100, 2);
    audio
        .set_parameter_sets(ParameterSets::Aac {
            config: vec![0x12, 0x10],
        })
        .await;
    server.add_audio_track(audio).await;
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let idx = match find_double_crlf(&buf) {
            Some(idx) => idx,
            None => {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                continue;
            }
        };

        let header_text = String::from_utf8_lossy(&buf[..idx]).to_string();
        let content_length: usize = header_text
            .lines()
            .find_map(|l| {
                let (key, value) = l.split_once(':')?;
                key.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().ok())
                    .flatten()
            })
            .unwrap_or(0);

        let body_start = idx + 4;
        if buf.len() >= body_start + content_length {
            return String::from_utf8_lossy(&buf[..body_start + content_length]).to_string();
        }
        let n = stream.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn send_request(stream: &mut TcpStream, raw: &str) -> String {
    stream.write_all(raw.as_bytes()).await.unwrap();
    read_response(stream).await
}

fn extract_header<'a>(response: &'a str, name: &str) -> &'a str {
    response
        .lines()
        .find_map(|l| {
            let (key, value) = l.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
        .unwrap_or_else(|| panic!("response missing {name} header:\n{response}"))
}

fn md5_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Md5::digest(data.as_ref());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

struct InterleavedFrame {
    channel: u8,
    #[allow(dead_code)]
    payload: Vec<u8>,
}

async fn read_interleaved_frame(stream: &mut TcpStream) -> InterleavedFrame {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(header[0], b'$');
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    InterleavedFrame {
        channel: header[1],
        payload,
    }
}

/// DESCRIBE, SETUP (TCP-interleaved channels 0/1), and PLAY a video
/// track over one connection, returning it positioned to read RTP.
async fn connect_and_play_video(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let describe = send_request(
        &mut stream,
        "DESCRIBE rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;
    assert!(describe.starts_with("RTSP/1.0 200"), "{describe}");

    let setup = send_request(
        &mut stream,
        "SETUP rtsp://127.0.0.1/stream/trackID=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
    )
    .await;
    assert!(setup.starts_with("RTSP/1.0 200"), "{setup}");
    let session_id = extract_header(&setup, "Session")
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let play = send_request(
        &mut stream,
        &format!("PLAY rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 3\r\nSession: {session_id}\r\n\r\n"),
    )
    .await;
    assert!(play.starts_with("RTSP/1.0 200"), "{play}");

    stream
}

#[tokio::test]
async fn options_requires_no_authentication() {
    let (_server, addr) = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let resp = send_request(
        &mut stream,
        "OPTIONS rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("RTSP/1.0 200 OK"));
    assert!(extract_header(&resp, "Public").contains("DESCRIBE"));
}

#[tokio::test]
async fn describe_before_parameter_sets_is_bad_request() {
    let (server, addr) = start_server(None).await;
    server.add_video_track(Track::new_h264(VIDEO_TRACK_ID, 96)).await;
    server
        .add_audio_track(Track::new_aac(AUDIO_TRACK_ID, 97, 44_100, 2))
        .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let resp = send_request(
        &mut stream,
        "DESCRIBE rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("RTSP/1.0 400"), "{resp}");
}

#[tokio::test]
async fn setup_and_play_report_session_and_rtp_info() {
    let (server, addr) = start_server(None).await;
    attach_ready_tracks(&server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_request(
        &mut stream,
        "DESCRIBE rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;

    let setup = send_request(
        &mut stream,
        "SETUP rtsp://127.0.0.1/stream/trackID=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
    )
    .await;
    let session_id = extract_header(&setup, "Session")
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let play = send_request(
        &mut stream,
        &format!("PLAY rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 3\r\nSession: {session_id}\r\n\r\n"),
    )
    .await;
    assert!(play.starts_with("RTSP/1.0 200"));
    assert!(extract_header(&play, "RTP-Info").contains("trackID=0"));
}

#[tokio::test]
async fn play_with_unknown_session_is_rejected() {
    let (_server, addr) = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let resp = send_request(
        &mut stream,
        "PLAY rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\nSession: 999\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("RTSP/1.0 454"), "{resp}");
}

#[tokio::test]
async fn two_clients_each_receive_fanned_out_video() {
    let (server, addr) = start_server(None).await;
    attach_ready_tracks(&server).await;

    let mut a = connect_and_play_video(addr).await;
    let mut b = connect_and_play_video(addr).await;

    server.feed_video(90_000, &[&[0x65, 1, 2, 3]]).await;

    let frame_a = read_interleaved_frame(&mut a).await;
    let frame_b = read_interleaved_frame(&mut b).await;
    assert_eq!(frame_a.channel, 0);
    assert_eq!(frame_b.channel, 0);
}

#[tokio::test]
async fn disconnected_client_does_not_block_delivery_to_others() {
    let (server, addr) = start_server(None).await;
    attach_ready_tracks(&server).await;

    let mut a = connect_and_play_video(addr).await;
    let b = connect_and_play_video(addr).await;
    drop(b); // abrupt close, no TEARDOWN

    // Give the dropped peer's socket time to actually close before we
    // feed, then feed twice so a stale write has a chance to surface.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.feed_video(90_000, &[&[0x65, 1, 2, 3]]).await;
    server.feed_video(93_600, &[&[0x65, 4, 5, 6]]).await;

    let frame = read_interleaved_frame(&mut a).await;
    assert_eq!(frame.channel, 0);
}

#[tokio::test]
async fn describe_includes_content_base() {
    let (server, addr) = start_server(None).await;
    attach_ready_tracks(&server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let resp = send_request(
        &mut stream,
        "DESCRIBE rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("RTSP/1.0 200"), "{resp}");
    assert_eq!(
        extract_header(&resp, "Content-Base"),
        "rtsp://127.0.0.1/stream"
    );
}

#[tokio::test]
async fn setup_with_multicast_transport_is_rejected() {
    let (server, addr) = start_server(None).await;
    attach_ready_tracks(&server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_request(
        &mut stream,
        "DESCRIBE rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;

    let setup = send_request(
        &mut stream,
        "SETUP rtsp://127.0.0.1/stream/trackID=0 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;multicast;client_port=5000-5001\r\n\r\n",
    )
    .await;
    assert!(setup.starts_with("RTSP/1.0 461"), "{setup}");
}

#[tokio::test]
async fn get_parameter_and_teardown_with_unknown_session_are_rejected() {
    let (_server, addr) = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let get_parameter = send_request(
        &mut stream,
        "GET_PARAMETER rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\nSession: 999\r\n\r\n",
    )
    .await;
    assert!(get_parameter.starts_with("RTSP/1.0 454"), "{get_parameter}");

    let teardown = send_request(
        &mut stream,
        "TEARDOWN rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 2\r\nSession: 999\r\n\r\n",
    )
    .await;
    assert!(teardown.starts_with("RTSP/1.0 454"), "{teardown}");
}

#[tokio::test]
async fn teardown_with_matching_session_succeeds() {
    let (server, addr) = start_server(None).await;
    attach_ready_tracks(&server).await;

    let mut stream = connect_and_play_video(addr).await;
    let session_id = {
        let describe = send_request(
            &mut stream,
            "GET_PARAMETER rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 10\r\n\r\n",
        )
        .await;
        assert!(describe.starts_with("RTSP/1.0 200"), "{describe}");
        extract_header(&describe, "Session")
            .split(';')
            .next()
            .unwrap()
            .to_string()
    };

    let teardown = send_request(
        &mut stream,
        &format!(
            "TEARDOWN rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 11\r\nSession: {session_id}\r\n\r\n"
        ),
    )
    .await;
    assert!(teardown.starts_with("RTSP/1.0 200"), "{teardown}");
}

#[tokio::test]
async fn digest_challenge_then_authorized_request() {
    let credentials = Credentials {
        username: "admin".to_string(),
        password: "hunter2".to_string(),
    };
    let (_server, addr) = start_server(Some(credentials.clone())).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let challenge_resp = send_request(
        &mut stream,
        "DESCRIBE rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;
    assert!(challenge_resp.starts_with("RTSP/1.0 401"), "{challenge_resp}");

    let challenge = extract_header(&challenge_resp, "WWW-Authenticate");
    let realm = digest_field(challenge, "realm");
    let nonce = digest_field(challenge, "nonce");

    let uri = "rtsp://127.0.0.1/stream";
    let ha1 = md5_hex(format!("{}:{}:{}", credentials.username, realm, credentials.password));
    let ha2 = md5_hex(format!("DESCRIBE:{}", uri));
    let response = md5_hex(format!("{}:{}:{}", ha1, nonce, ha2));
    let authorization = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        credentials.username, realm, nonce, uri, response
    );

    let authorized_resp = send_request(
        &mut stream,
        &format!("DESCRIBE {uri} RTSP/1.0\r\nCSeq: 2\r\nAuthorization: {authorization}\r\n\r\n"),
    )
    .await;
    assert!(
        !authorized_resp.starts_with("RTSP/1.0 401"),
        "{authorized_resp}"
    );
}

fn digest_field<'a>(challenge: &'a str, field: &str) -> &'a str {
    let needle = format!("{field}=\"");
    let start = challenge.find(&needle).unwrap() + needle.len();
    let rest = &challenge[start..];
    &rest[..rest.find('"').unwrap()]
}
