//! RTSP request parsing and response serialization (RFC 2326 §4, §6).

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub cseq: u32,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parse one RTSP request out of `buf`, returning the request plus
    /// the number of bytes consumed, or `None` if the header block is
    /// not yet complete (caller should read more and retry).
    pub fn parse(buf: &[u8]) -> Result<Option<(RtspRequest, usize)>> {
        let header_end = match find_double_crlf(buf) {
            Some(idx) => idx,
            None => return Ok(None),
        };

        let header_text = std::str::from_utf8(&buf[..header_end])
            .context("RTSP request headers are not valid UTF-8")?;
        let mut lines = header_text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .context("missing method in request line")?
            .to_string();
        let uri = parts
            .next()
            .context("missing URI in request line")?
            .to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let cseq = headers
            .get("cseq")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        let content_length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let body_start = header_end + 4;
        if buf.len() < body_start + content_length {
            return Ok(None); // body not fully received yet
        }

        let body = buf[body_start..body_start + content_length].to_vec();

        Ok(Some((
            RtspRequest {
                method,
                uri,
                cseq,
                headers,
                body,
            },
            body_start + content_length,
        )))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// An RTSP response under construction. Headers are emitted in the
/// order they are added.
pub struct RtspResponse {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RtspResponse {
    pub fn ok(cseq: u32) -> Self {
        RtspResponse::new(200, "OK", cseq)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn new(status: u16, reason: &str, cseq: u32) -> Self {
        RtspResponse {
            status,
            reason: reason.to_string(),
            headers: vec![("CSeq".to_string(), cseq.to_string())],
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.headers
            .push(("Content-Length".to_string(), body.len().to_string()));
        self.body = body;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.status, self.reason);
        for (key, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", key, value));
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Extract the `trackID=<n>` final path segment from a request URI
///, e.g. `rtsp://host/stream/trackID=0`.
pub fn track_id_from_uri(uri: &str) -> Option<u8> {
    let last_segment = url::Url::parse(uri)
        .ok()
        .and_then(|parsed| parsed.path_segments()?.last().map(str::to_string));

    let last_segment = last_segment.unwrap_or_else(|| uri.rsplit('/').next().unwrap_or(uri).to_string());
    last_segment.strip_prefix("trackID=")?.parse().ok()
}

#[derive(Debug, Default, Clone)]
pub struct TransportHeader {
    pub protocol: String, // "TCP" | "UDP"
    pub is_multicast: bool,
    pub client_port: Option<(u16, u16)>,
    pub interleaved: Option<(u8, u8)>,
}

/// Parse a `Transport:` header value, choosing the first offer present.
pub fn parse_transport_header(value: &str) -> Result<TransportHeader> {
    let first = value.split(',').next().unwrap_or(value);
    let mut header = TransportHeader::default();

    for (i, field) in first.split(';').enumerate() {
        let field = field.trim();
        if i == 0 {
            // e.g. "RTP/AVP/TCP" or "RTP/AVP" (defaults to UDP)
            header.protocol = if field.to_ascii_uppercase().contains("TCP") {
                "TCP".to_string()
            } else {
                "UDP".to_string()
            };
            continue;
        }
        if field.eq_ignore_ascii_case("multicast") {
            header.is_multicast = true;
        } else if let Some(v) = field.strip_prefix("client_port=") {
            header.client_port = parse_port_pair(v);
        } else if let Some(v) = field.strip_prefix("interleaved=") {
            if let Some((a, b)) = parse_port_pair(v) {
                header.interleaved = Some((a as u8, b as u8));
            }
        }
    }

    if header.protocol.is_empty() {
        bail!("empty Transport header");
    }

    Ok(header)
}

fn parse_port_pair(v: &str) -> Option<(u16, u16)> {
    let (a, b) = v.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options_request() {
        let raw = b"OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let (req, consumed) = RtspRequest::parse(raw).unwrap().unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://h/");
        assert_eq!(req.cseq, 1);
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn incomplete_headers_return_none() {
        let raw = b"OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n";
        assert!(RtspRequest::parse(raw).unwrap().is_none());
    }

    #[test]
    fn waits_for_full_body_per_content_length() {
        let raw = b"TEARDOWN rtsp://h/ RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nabc";
        assert!(RtspRequest::parse(raw).unwrap().is_none());

        let raw = b"TEARDOWN rtsp://h/ RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nabcde";
        let (req, consumed) = RtspRequest::parse(raw).unwrap().unwrap();
        assert_eq!(req.body, b"abcde");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let raw = b"OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\nSession: 42\r\n\r\n";
        let (req, _) = RtspRequest::parse(raw).unwrap().unwrap();
        assert_eq!(req.header("session"), Some("42"));
        assert_eq!(req.header("Session"), Some("42"));
    }

    #[test]
    fn response_serializes_status_and_headers_in_order() {
        let resp = RtspResponse::ok(7)
            .header("Session", "1;timeout=60")
            .to_bytes();
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(text.contains("CSeq: 7\r\n"));
        assert!(text.contains("Session: 1;timeout=60\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn response_with_body_sets_content_length() {
        let body = b"v=0\r\n".to_vec();
        let resp = RtspResponse::ok(1).body("application/sdp", body.clone());
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(bytes.ends_with(&body));
    }

    #[test]
    fn track_id_parsed_from_suffix() {
        assert_eq!(track_id_from_uri("rtsp://h/stream/trackID=1"), Some(1));
        assert_eq!(track_id_from_uri("rtsp://h/stream"), None);
    }

    #[test]
    fn transport_header_picks_first_offer_and_tcp_channels() {
        let t = parse_transport_header("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        assert_eq!(t.protocol, "TCP");
        assert_eq!(t.interleaved, Some((0, 1)));
    }

    #[test]
    fn transport_header_udp_client_ports() {
        let t = parse_transport_header("RTP/AVP;unicast;client_port=4588-4589").unwrap();
        assert_eq!(t.protocol, "UDP");
        assert_eq!(t.client_port, Some((4588, 4589)));
    }

    #[test]
    fn transport_header_multicast_flagged() {
        let t = parse_transport_header("RTP/AVP;multicast").unwrap();
        assert!(t.is_multicast);
    }
}
