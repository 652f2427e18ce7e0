//! Externalized server configuration.
//!
//! Loading these values from a file or CLI args is explicitly out of
//! scope; this is just the shape the core expects them in.

use std::net::SocketAddr;

use crate::auth::Credentials;

/// Configuration handed to [`crate::server::Server::new`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the RTSP TCP listener binds to.
    pub listen_addr: SocketAddr,
    /// Optional username/password; when present, every request is
    /// authenticated.
    pub credentials: Option<Credentials>,
    /// `s=` line of the SDP offered in DESCRIBE.
    pub session_name: String,
    /// When set, connection SSRCs are derived from this seed plus a
    /// per-connection counter instead of `rand`, for reproducible tests.
    pub ssrc_seed: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:554".parse().unwrap(),
            credentials: None,
            session_name: "rtsp-media-server".to_string(),
            ssrc_seed: None,
        }
    }
}
