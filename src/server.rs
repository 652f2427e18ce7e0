//! Server orchestrator: owns the listener, the sink, and
//! the keep-alive sweep, and is the crate's top-level entry point.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::sink::Sink;
use crate::track::Track;

/// How often the keep-alive sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// The RTSP server core. Construct it, attach tracks with
/// [`Server::add_video_track`]/[`Server::add_audio_track`], then call
/// [`Server::start_listen`]; feed samples with [`Server::feed_video`]/
/// [`Server::feed_audio`] for as long as the server runs.
pub struct Server {
    config: ServerConfig,
    sink: Arc<Sink>,
    auth: Option<Arc<Authenticator>>,
    session_name: Arc<str>,
    shutdown: Arc<Notify>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    bound_addr: OnceLock<SocketAddr>,
    ssrc_counter: AtomicU32,
}

impl Server {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let auth = config
            .credentials
            .clone()
            .map(|c| Arc::new(Authenticator::new(c)));
        let session_name: Arc<str> = Arc::from(config.session_name.as_str());

        Arc::new(Server {
            config,
            sink: Arc::new(Sink::new()),
            auth,
            session_name,
            shutdown: Arc::new(Notify::new()),
            listen_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
            bound_addr: OnceLock::new(),
            ssrc_counter: AtomicU32::new(0),
        })
    }

    pub async fn add_video_track(&self, track: Track) {
        self.sink.add_video_track(track).await;
    }

    pub async fn add_audio_track(&self, track: Track) {
        self.sink.add_audio_track(track).await;
    }

    /// Packetize and deliver one access unit of H.264/H.265 to every
    /// playing connection.
    pub async fn feed_video(&self, timestamp: u32, nal_units: &[&[u8]]) {
        self.sink.feed_video(timestamp, nal_units).await;
    }

    /// Packetize and deliver one AAC access unit to every playing
    /// connection.
    pub async fn feed_audio(&self, timestamp: u32, access_unit: &[u8]) {
        self.sink.feed_audio(timestamp, access_unit).await;
    }

    /// The address the listener is bound to. Before [`Server::start_listen`]
    /// runs, this is the configured address (which may be an ephemeral
    /// `:0` port); afterwards it is the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        *self.bound_addr.get().unwrap_or(&self.config.listen_addr)
    }

    /// Bind the RTSP TCP listener and start accepting connections plus
    /// the keep-alive sweep. Call on an `Arc<Server>`.
    pub async fn start_listen(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("binding RTSP listener on {}", self.config.listen_addr))?;
        let bound_addr = listener.local_addr()?;
        let _ = self.bound_addr.set(bound_addr);
        log::info!("rtsp-media-server listening on {bound_addr}");

        let accept_server = self.clone();
        let accept_shutdown = self.shutdown.clone();
        let listen_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, remote_addr)) => {
                                Server::spawn_connection(accept_server.clone(), stream, remote_addr);
                            }
                            Err(e) => log::warn!("accept error: {e}"),
                        }
                    }
                    _ = accept_shutdown.notified() => break,
                }
            }
        });

        let registry = self.sink.registry().clone();
        let sweep_shutdown = self.shutdown.clone();
        let sweep_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let (total, playing) = registry.sweep_timeouts().await;
                        log::debug!("keepalive sweep: {total} connections, {playing} playing");
                    }
                    _ = sweep_shutdown.notified() => break,
                }
            }
        });

        *self.listen_task.lock().await = Some(listen_task);
        *self.sweep_task.lock().await = Some(sweep_task);
        Ok(())
    }

    /// Signal the accept loop and sweep task to stop, and wait for both
    /// to exit. Existing connections are left to run to their own
    /// TEARDOWN or timeout.
    pub async fn stop_listen(&self) {
        self.shutdown.notify_waiters();
        if let Some(task) = self.listen_task.lock().await.take() {
            let _ = task.await;
        }
        if let Some(task) = self.sweep_task.lock().await.take() {
            let _ = task.await;
        }
    }

    fn spawn_connection(server: Arc<Server>, stream: TcpStream, remote_addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let ssrc = match server.config.ssrc_seed {
            Some(seed) => seed.wrapping_add(server.ssrc_counter.fetch_add(1, Ordering::Relaxed)),
            None => rand::thread_rng().gen(),
        };
        let connection = Connection::new(remote_addr, ssrc, write_half);

        let registry = server.sink.registry().clone();
        let sink = server.sink.clone();
        let auth = server.auth.clone();
        let session_name = server.session_name.clone();

        tokio::spawn(async move {
            registry.add(connection.clone()).await;
            if let Err(e) = connection
                .run(read_half, sink, auth, session_name, registry)
                .await
            {
                log::debug!("connection {remote_addr} ended: {e}");
            }
        });
    }
}
