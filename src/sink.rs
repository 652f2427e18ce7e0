//! The broadcast sink: owns the two configured tracks
//! and the session registry, and turns `feed_video`/`feed_audio` calls
//! into per-connection RTP fan-out.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::connection::{Connection, StreamKind};
use crate::registry::Registry;
use crate::track::Track;

/// Holds the video/audio tracks and the live connection registry. Tracks
/// are normally attached with [`Sink::add_video_track`]/
/// [`Sink::add_audio_track`] before the server starts listening; the
/// interior `RwLock`s exist so `Server` can hand out a shared
/// `Arc<Sink>` to every connection task, not to support attaching tracks
/// mid-stream.
pub struct Sink {
    video: RwLock<Option<Arc<Track>>>,
    audio: RwLock<Option<Arc<Track>>>,
    registry: Arc<Registry>,
}

impl Sink {
    pub fn new() -> Self {
        Sink {
            video: RwLock::new(None),
            audio: RwLock::new(None),
            registry: Arc::new(Registry::new()),
        }
    }

    pub async fn add_video_track(&self, track: Track) {
        *self.video.write().await = Some(Arc::new(track));
    }

    pub async fn add_audio_track(&self, track: Track) {
        *self.audio.write().await = Some(Arc::new(track));
    }

    pub async fn video(&self) -> Option<Arc<Track>> {
        self.video.read().await.clone()
    }

    pub async fn audio(&self) -> Option<Arc<Track>> {
        self.audio.read().await.clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Build the full session-level SDP for DESCRIBE, or `None` if the
    /// video track is missing/not ready, or an audio track is attached
    /// but not yet ready. An unattached audio
    /// track is not an error — the SDP simply omits it.
    pub async fn describe_sdp(&self, session_name: &str) -> Option<String> {
        let video = self.video().await?;
        if !video.is_ready().await {
            return None;
        }
        let audio = self.audio().await;
        if let Some(audio) = &audio {
            if !audio.is_ready().await {
                return None;
            }
        }

        let mut sdp = format!(
            "v=0\r\no=user 123 0 IN IP4 0.0.0.0\r\ns={}\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\n",
            session_name
        );
        sdp.push_str(&video.sdp_fragment().await.replace('\n', "\r\n"));
        if let Some(audio) = audio {
            sdp.push_str(&audio.sdp_fragment().await.replace('\n', "\r\n"));
        }
        Some(sdp)
    }

    /// Packetize and fan out one video access unit. A
    /// connection whose write fails is torn down and dropped from the
    /// registry rather than stalling delivery to the rest.
    pub async fn feed_video(&self, timestamp: u32, nal_units: &[&[u8]]) {
        let Some(track) = self.video().await else {
            return;
        };
        self.fan_out(StreamKind::Video, &track, timestamp, nal_units).await;
    }

    /// Packetize and fan out one AAC access unit.
    pub async fn feed_audio(&self, timestamp: u32, access_unit: &[u8]) {
        let Some(track) = self.audio().await else {
            return;
        };
        self.fan_out(StreamKind::Audio, &track, timestamp, &[access_unit]).await;
    }

    async fn fan_out(
        &self,
        stream: StreamKind,
        track: &Arc<Track>,
        timestamp: u32,
        access_unit: &[&[u8]],
    ) {
        let unit = track.packetize(timestamp, access_unit);
        let connections = self.registry.snapshot().await;

        for connection in connections {
            if let Err(e) = connection.deliver(stream, &unit, timestamp).await {
                log::debug!(
                    "dropping connection {} after write error: {e}",
                    connection.remote_addr
                );
                self.drop_connection(&connection).await;
            }
        }
    }

    async fn drop_connection(&self, connection: &Arc<Connection>) {
        connection.teardown().await;
        self.registry.remove(connection).await;
    }
}

impl Default for Sink {
    fn default() -> Self {
        Self::new()
    }
}
