//! RTSP 1.0 server core for streaming pre-encoded H.264/H.265 video and
//! AAC audio to remote clients over RTP (RFC 2326, RFC 3550, RFC 6184,
//! RFC 7798, RFC 3640).
//!
//! [`Server`] is the entry point: construct it from a [`ServerConfig`],
//! attach a video and/or audio [`Track`](track::Track), call
//! [`Server::start_listen`], then feed encoded access units with
//! [`Server::feed_video`]/[`Server::feed_audio`] as they become
//! available. Everything downstream of that — the RTSP dialog, RTP
//! packetization, transport multiplexing, and session bookkeeping — is
//! handled internally.

pub mod auth;
pub mod config;
pub mod connection;
pub mod dialog;
pub mod error;
pub mod registry;
pub mod rtp;
pub mod rtsp;
pub mod server;
pub mod sink;
pub mod track;
pub mod transport;

pub use config::ServerConfig;
pub use error::RtspStatus;
pub use server::Server;
pub use track::Track;
