//! RTSP 1.0 wire parsing (RFC 2326 subset).

pub mod message;

pub use message::{parse_transport_header, track_id_from_uri, RtspRequest, RtspResponse, TransportHeader};
