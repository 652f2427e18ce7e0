//! The RTSP method dialog: one dispatch function per
//! connection, called once per fully-parsed request.

use std::sync::Arc;

use crate::auth::{AuthOutcome, Authenticator};
use crate::connection::{self, Connection, StreamKind};
use crate::error::RtspStatus;
use crate::registry::Registry;
use crate::rtsp::{parse_transport_header, track_id_from_uri, RtspRequest, RtspResponse};
use crate::sink::Sink;
use crate::track::{AUDIO_TRACK_ID, VIDEO_TRACK_ID};
use crate::transport::Transport;

const SESSION_TIMEOUT_SECS: u64 = 60;

fn status(status: RtspStatus, cseq: u32) -> RtspResponse {
    RtspResponse::new(status.code(), status.reason(), cseq)
}

/// Handle one parsed request against `conn`'s current state. OPTIONS is
/// exempt from authentication; every other method
/// is challenged when the server was configured with credentials.
pub async fn handle(
    conn: &Arc<Connection>,
    sink: &Arc<Sink>,
    auth: Option<&Authenticator>,
    session_name: &str,
    registry: &Arc<Registry>,
    req: &RtspRequest,
) -> RtspResponse {
    let method = req.method.to_ascii_uppercase();

    if method != "OPTIONS" {
        if let Some(authenticator) = auth {
            match authenticator.verify(&req.method, &req.uri, req.header("authorization")) {
                AuthOutcome::Authorized => {}
                AuthOutcome::Missing => return unauthorized(authenticator, req.cseq),
                AuthOutcome::Invalid => {
                    let response = unauthorized(authenticator, req.cseq);
                    conn.teardown().await;
                    registry.remove(conn).await;
                    return response;
                }
            }
        }
    }

    match method.as_str() {
        "OPTIONS" => options(req.cseq),
        "DESCRIBE" => describe(sink, session_name, req).await,
        "SETUP" => setup(conn, sink, registry, req).await,
        "PLAY" => play(conn, req),
        "PAUSE" => pause(conn, req),
        "GET_PARAMETER" => get_parameter(conn, req),
        "TEARDOWN" => teardown(conn, req),
        _ => RtspResponse::new(501, "Not Implemented", req.cseq),
    }
}

fn unauthorized(auth: &Authenticator, cseq: u32) -> RtspResponse {
    status(RtspStatus::Unauthorized, cseq).header("WWW-Authenticate", auth.challenge_header())
}

fn options(cseq: u32) -> RtspResponse {
    RtspResponse::ok(cseq).header(
        "Public",
        "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER",
    )
}

async fn describe(sink: &Sink, session_name: &str, req: &RtspRequest) -> RtspResponse {
    match sink.describe_sdp(session_name).await {
        Some(sdp) => RtspResponse::ok(req.cseq)
            .header("Content-Base", req.uri.clone())
            .body("application/sdp", sdp.into_bytes()),
        None => status(RtspStatus::BadRequest, req.cseq),
    }
}

async fn setup(
    conn: &Arc<Connection>,
    sink: &Arc<Sink>,
    registry: &Arc<Registry>,
    req: &RtspRequest,
) -> RtspResponse {
    let Some(track_id) = track_id_from_uri(&req.uri) else {
        return status(RtspStatus::BadRequest, req.cseq);
    };

    let stream = match track_id {
        VIDEO_TRACK_ID if sink.video().await.is_some() => StreamKind::Video,
        AUDIO_TRACK_ID if sink.audio().await.is_some() => StreamKind::Audio,
        _ => return status(RtspStatus::BadRequest, req.cseq),
    };

    let Some(transport_header) = req.header("transport") else {
        return status(RtspStatus::BadRequest, req.cseq);
    };
    let Ok(parsed) = parse_transport_header(transport_header) else {
        return status(RtspStatus::UnsupportedTransport, req.cseq);
    };

    if parsed.is_multicast {
        return status(RtspStatus::UnsupportedTransport, req.cseq);
    }

    let transport = if parsed.protocol == "TCP" {
        let Some((data_channel, control_channel)) = parsed.interleaved else {
            return status(RtspStatus::UnsupportedTransport, req.cseq);
        };
        Transport::new_tcp(conn.write_half(), data_channel, control_channel)
    } else {
        let Some((data_port, control_port)) = parsed.client_port else {
            return status(RtspStatus::UnsupportedTransport, req.cseq);
        };
        let touch = connection::spawn_keepalive_bridge(conn.clone());
        match Transport::bind_udp(conn.remote_addr.ip(), data_port, control_port, touch).await {
            Ok(t) => t,
            Err(e) => {
                log::warn!("UDP transport bind failed for {}: {e}", conn.remote_addr);
                return RtspResponse::new(500, "Internal Server Error", req.cseq);
            }
        }
    };

    let transport_fields = transport.server_transport_fields();
    conn.set_transport(stream, Arc::new(transport));

    if conn.session_id().is_none() {
        conn.set_session_id(registry.allocate_session_id());
    }

    RtspResponse::ok(req.cseq)
        .header("Session", session_header(conn))
        .header(
            "Transport",
            format!("RTP/AVP/{};unicast;{}", parsed.protocol, transport_fields),
        )
}

fn play(conn: &Arc<Connection>, req: &RtspRequest) -> RtspResponse {
    if let Some(denied) = check_session(conn, req) {
        return denied;
    }

    conn.set_play(true);
    conn.arm_sender_reports();

    let mut rtp_info = Vec::new();
    if conn.has_transport(StreamKind::Video) {
        rtp_info.push(format!(
            "url=trackID={};seq={}",
            VIDEO_TRACK_ID,
            conn.sequence_number(StreamKind::Video)
        ));
    }
    if conn.has_transport(StreamKind::Audio) {
        rtp_info.push(format!(
            "url=trackID={};seq={}",
            AUDIO_TRACK_ID,
            conn.sequence_number(StreamKind::Audio)
        ));
    }

    let response = RtspResponse::ok(req.cseq).header("Session", session_header(conn));
    if rtp_info.is_empty() {
        response
    } else {
        response.header("RTP-Info", rtp_info.join(","))
    }
}

fn pause(conn: &Arc<Connection>, req: &RtspRequest) -> RtspResponse {
    if let Some(denied) = check_session(conn, req) {
        return denied;
    }
    conn.set_play(false);
    RtspResponse::ok(req.cseq).header("Session", session_header(conn))
}

fn get_parameter(conn: &Arc<Connection>, req: &RtspRequest) -> RtspResponse {
    if let Some(denied) = check_session(conn, req) {
        return denied;
    }
    RtspResponse::ok(req.cseq).header("Session", session_header(conn))
}

fn teardown(conn: &Arc<Connection>, req: &RtspRequest) -> RtspResponse {
    if let Some(denied) = check_session(conn, req) {
        return denied;
    }
    RtspResponse::ok(req.cseq).header("Session", session_header(conn))
}

/// Validate the request's `Session:` header (if any) against this
/// connection's assigned session id.
fn check_session(conn: &Connection, req: &RtspRequest) -> Option<RtspResponse> {
    match req.header("session") {
        Some(header) => {
            let requested = header.split(';').next().unwrap_or(header);
            if conn.session_id_matches(requested) {
                None
            } else {
                Some(status(RtspStatus::SessionNotFound, req.cseq))
            }
        }
        None if conn.has_session() => None,
        None => Some(status(RtspStatus::SessionNotFound, req.cseq)),
    }
}

fn session_header(conn: &Connection) -> String {
    format!(
        "{};timeout={}",
        conn.session_id().unwrap_or_default(),
        SESSION_TIMEOUT_SECS
    )
}
