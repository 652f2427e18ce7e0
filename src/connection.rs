//! Per-client connection state and its RTSP receive loop.
//!
//! Field mutation is serialized through one `std::sync::Mutex` — never
//! held across an `.await` — while the actual socket writes (which are
//! async) happen after the lock is dropped. The TCP write half is
//! additionally wrapped in its own `tokio::sync::Mutex` and shared with
//! any TCP-interleaved [`Transport`] attached to this connection, so
//! RTSP responses and interleaved RTP/RTCP never race on the same
//! socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::dialog;
use crate::registry::Registry;
use crate::rtp::{header, rtcp, PacketizedUnit};
use crate::rtsp::RtspRequest;
use crate::sink::Sink;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

struct StreamState {
    sequence_number: u16,
    rtp_packet_count: u32,
    octet_count: u32,
    must_send_rtcp: bool,
    transport: Option<Arc<Transport>>,
}

impl StreamState {
    fn new() -> Self {
        StreamState {
            sequence_number: 1,
            rtp_packet_count: 0,
            octet_count: 0,
            must_send_rtcp: false,
            transport: None,
        }
    }
}

struct ConnectionState {
    session_id: Option<String>,
    play: bool,
    last_keepalive: Instant,
    video: StreamState,
    audio: StreamState,
}

impl ConnectionState {
    fn stream(&self, stream: StreamKind) -> &StreamState {
        match stream {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        }
    }

    fn stream_mut(&mut self, stream: StreamKind) -> &mut StreamState {
        match stream {
            StreamKind::Video => &mut self.video,
            StreamKind::Audio => &mut self.audio,
        }
    }
}

/// One RTSP client connection.
pub struct Connection {
    pub remote_addr: SocketAddr,
    pub ssrc: u32,
    write_half: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    state: Mutex<ConnectionState>,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
}

impl Connection {
    pub fn new(remote_addr: SocketAddr, ssrc: u32, write_half: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Connection {
            remote_addr,
            ssrc,
            write_half: Arc::new(tokio::sync::Mutex::new(write_half)),
            state: Mutex::new(ConnectionState {
                session_id: None,
                play: false,
                last_keepalive: Instant::now(),
                video: StreamState::new(),
                audio: StreamState::new(),
            }),
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
        })
    }

    pub fn write_half(&self) -> Arc<tokio::sync::Mutex<OwnedWriteHalf>> {
        self.write_half.clone()
    }

    pub fn touch_keepalive(&self) {
        self.state.lock().unwrap().last_keepalive = Instant::now();
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        Instant::now().duration_since(self.state.lock().unwrap().last_keepalive) > timeout
    }

    pub fn session_id_matches(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .session_id
            .as_deref()
            .is_some_and(|sid| sid == id)
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().unwrap().session_id.clone()
    }

    pub fn set_session_id(&self, id: String) {
        self.state.lock().unwrap().session_id = Some(id);
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().unwrap().session_id.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().play
    }

    pub fn set_play(&self, play: bool) {
        self.state.lock().unwrap().play = play;
    }

    /// Set `must_send_rtcp` on both streams.
    pub fn arm_sender_reports(&self) {
        let mut state = self.state.lock().unwrap();
        state.video.must_send_rtcp = true;
        state.audio.must_send_rtcp = true;
    }

    pub fn set_transport(&self, stream: StreamKind, transport: Arc<Transport>) {
        self.state.lock().unwrap().stream_mut(stream).transport = Some(transport);
    }

    pub fn has_transport(&self, stream: StreamKind) -> bool {
        self.state.lock().unwrap().stream(stream).transport.is_some()
    }

    pub fn sequence_number(&self, stream: StreamKind) -> u16 {
        self.state.lock().unwrap().stream(stream).sequence_number
    }

    /// Cancel the receive loop and drop every attached transport.
    pub async fn teardown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
        let mut state = self.state.lock().unwrap();
        state.play = false;
        state.video.transport = None;
        state.audio.transport = None;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stamp and send one packetized access unit to this connection's
    /// stream, emitting a Sender Report first if one is due. No-op if the connection isn't playing or has no
    /// transport attached for this stream.
    pub async fn deliver(
        &self,
        stream: StreamKind,
        unit: &PacketizedUnit,
        timestamp: u32,
    ) -> std::io::Result<()> {
        let (transport, send_rtcp) = {
            let mut state = self.state.lock().unwrap();
            if !state.play {
                return Ok(());
            }
            let stream_state = state.stream_mut(stream);
            let Some(transport) = stream_state.transport.clone() else {
                return Ok(());
            };
            let send_rtcp = stream_state.must_send_rtcp;
            stream_state.must_send_rtcp = false;
            (transport, send_rtcp)
        };

        if send_rtcp {
            let (packet_count, octet_count) = {
                let state = self.state.lock().unwrap();
                let s = state.stream(stream);
                (s.rtp_packet_count, s.octet_count)
            };
            let sr = rtcp::build_sender_report_now(self.ssrc, timestamp, packet_count, octet_count);
            transport.write_control(&sr).await?;
        }

        for packet in &unit.packets {
            let mut packet = packet.clone();
            let seq = {
                let mut state = self.state.lock().unwrap();
                let s = state.stream_mut(stream);
                let seq = s.sequence_number;
                s.sequence_number = s.sequence_number.wrapping_add(1);
                s
                    .rtp_packet_count = s.rtp_packet_count.wrapping_add(1);
                seq
            };
            header::patch_sequence(&mut packet, seq);
            header::patch_ssrc(&mut packet, self.ssrc);
            transport.write_data(&packet).await?;
        }

        self.state.lock().unwrap().stream_mut(stream).octet_count +=
            unit.payload_bytes as u32;

        Ok(())
    }

    /// Drive this connection's RTSP receive loop until TEARDOWN, a
    /// socket error, or cancellation.
    pub async fn run(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        sink: Arc<Sink>,
        auth: Option<Arc<crate::auth::Authenticator>>,
        session_name: Arc<str>,
        registry: Arc<Registry>,
    ) -> Result<()> {
        let mut buf = Vec::with_capacity(4096);
        let mut scratch = [0u8; 4096];

        loop {
            if self.is_cancelled() {
                break;
            }

            let n = tokio::select! {
                n = read_half.read(&mut scratch) => n?,
                _ = self.cancel_notify.notified() => break,
            };

            if n == 0 {
                break; // peer closed the connection
            }
            buf.extend_from_slice(&scratch[..n]);

            loop {
                if buf.first() == Some(&b'$') {
                    match try_skip_interleaved_frame(&buf) {
                        Some(consumed) => {
                            self.touch_keepalive();
                            buf.drain(..consumed);
                            continue;
                        }
                        None => break, // incomplete interleaved frame, read more
                    }
                }

                match RtspRequest::parse(&buf) {
                    Ok(Some((request, consumed))) => {
                        buf.drain(..consumed);
                        self.touch_keepalive();

                        let response = dialog::handle(
                            &self,
                            &sink,
                            auth.as_deref(),
                            &session_name,
                            &registry,
                            &request,
                        )
                        .await;

                        let bytes = response.to_bytes();
                        let mut writer = self.write_half.lock().await;
                        if let Err(e) = writer.write_all(&bytes).await {
                            log::debug!("write error on {}: {e}", self.remote_addr);
                            drop(writer);
                            self.teardown().await;
                            registry.remove(&self).await;
                            return Ok(());
                        }
                        drop(writer);

                        if request.method.eq_ignore_ascii_case("TEARDOWN") && response.is_success() {
                            self.teardown().await;
                            registry.remove(&self).await;
                            return Ok(());
                        }
                    }
                    Ok(None) => break, // wait for more bytes
                    Err(e) => {
                        log::warn!("malformed RTSP request from {}: {e}", self.remote_addr);
                        buf.clear();
                        break;
                    }
                }
            }
        }

        self.teardown().await;
        registry.remove(&self).await;
        Ok(())
    }
}

/// If `buf` starts with a complete `$<channel><len><payload>` frame
/// (RFC 2326 §10.12), return the number of bytes it occupies.
fn try_skip_interleaved_frame(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total = 4 + len;
    if buf.len() < total {
        return None;
    }
    Some(total)
}

/// Spawn a channel that forwards UDP control-socket activity into a
/// keep-alive touch on `connection`.
pub fn spawn_keepalive_bridge(connection: Arc<Connection>) -> mpsc::UnboundedSender<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            connection.touch_keepalive();
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_interleaved_frame_requires_full_payload() {
        let mut buf = vec![b'$', 0];
        buf.extend_from_slice(&3u16.to_be_bytes());
        buf.extend_from_slice(&[1, 2]); // only 2 of 3 payload bytes
        assert_eq!(try_skip_interleaved_frame(&buf), None);

        buf.push(3);
        assert_eq!(try_skip_interleaved_frame(&buf), Some(7));
    }
}
