//! HTTP-style Basic/Digest authentication.
//!
//! Only active when the server is configured with a [`Credentials`]
//! pair. The realm is fixed for the lifetime of the [`Authenticator`];
//! the nonce is generated once at construction.

use std::collections::HashMap;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use md5::{Digest, Md5};
use rand::Rng;

/// The realm advertised in `WWW-Authenticate` challenges.
const DEFAULT_REALM: &str = "SharpRTSPServer";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Basic,
    Digest,
}

/// Outcome of checking a request's `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No credentials configured, or the header checked out.
    Authorized,
    /// No `Authorization` header was present; challenge and keep the
    /// connection open.
    Missing,
    /// A header was present but did not verify; challenge and tear the
    /// connection down.
    Invalid,
}

pub struct Authenticator {
    scheme: Scheme,
    realm: String,
    credential: Credentials,
    nonce: String,
}

impl Authenticator {
    pub fn new(credential: Credentials) -> Self {
        Authenticator::with_scheme(credential, Scheme::Digest)
    }

    pub fn with_scheme(credential: Credentials, scheme: Scheme) -> Self {
        let nonce: u32 = rand::thread_rng().gen_range(100_000_000..=999_999_999);
        Authenticator {
            scheme,
            realm: DEFAULT_REALM.to_string(),
            credential,
            nonce: nonce.to_string(),
        }
    }

    /// The `WWW-Authenticate` challenge header value.
    pub fn challenge_header(&self) -> String {
        match self.scheme {
            Scheme::Digest => format!(
                "Digest realm=\"{}\", nonce=\"{}\", algorithm=MD5",
                self.realm, self.nonce
            ),
            Scheme::Basic => format!("Basic realm=\"{}\"", self.realm),
        }
    }

    /// Verify a request's `Authorization` header, if any, against the
    /// configured credential.
    pub fn verify(&self, method: &str, uri: &str, authorization: Option<&str>) -> AuthOutcome {
        let Some(header) = authorization else {
            return AuthOutcome::Missing;
        };

        let ok = match self.scheme {
            Scheme::Digest => self.verify_digest(method, uri, header),
            Scheme::Basic => self.verify_basic(header),
        };

        if ok {
            AuthOutcome::Authorized
        } else {
            AuthOutcome::Invalid
        }
    }

    fn verify_basic(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64_STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        decoded == format!("{}:{}", self.credential.username, self.credential.password)
    }

    fn verify_digest(&self, method: &str, uri: &str, header: &str) -> bool {
        let Some(params) = header.strip_prefix("Digest ") else {
            return false;
        };
        let fields = parse_digest_params(params);

        let Some(username) = fields.get("username") else {
            return false;
        };
        let Some(nonce) = fields.get("nonce") else {
            return false;
        };
        let Some(digest_uri) = fields.get("uri") else {
            return false;
        };
        let Some(response) = fields.get("response") else {
            return false;
        };

        if username != &self.credential.username || nonce != &self.nonce {
            return false;
        }

        // RFC 2617 §3.2.2.1: response = MD5(HA1:nonce:HA2), no qop.
        let ha1 = md5_hex(format!(
            "{}:{}:{}",
            self.credential.username, self.realm, self.credential.password
        ));
        let ha2 = md5_hex(format!("{}:{}", method, digest_uri));
        let expected = md5_hex(format!("{}:{}:{}", ha1, self.nonce, ha2));

        // `uri` must also match the header's claimed URI; comparing
        // against the request's own target catches a stale challenge
        // replayed against a different resource.
        digest_uri == uri && expected == *response
    }
}

fn md5_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Md5::digest(data.as_ref());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse `key="value"` / `key=value` pairs from a Digest header's
/// parameter list (the part after `Digest `).
fn parse_digest_params(s: &str) -> HashMap<String, String> {
    s.split(',')
        .filter_map(|part| {
            let part = part.trim();
            let (key, value) = part.split_once('=')?;
            let value = value.trim().trim_matches('"');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn missing_header_is_missing_not_invalid() {
        let auth = Authenticator::new(creds());
        assert_eq!(
            auth.verify("DESCRIBE", "rtsp://host/", None),
            AuthOutcome::Missing
        );
    }

    #[test]
    fn challenge_contains_realm_and_nine_digit_nonce() {
        let auth = Authenticator::new(creds());
        let challenge = auth.challenge_header();
        assert!(challenge.starts_with("Digest realm=\"SharpRTSPServer\""));
        assert!(challenge.contains("algorithm=MD5"));
        assert_eq!(auth.nonce.len(), 9);
    }

    #[test]
    fn correct_digest_response_authorizes() {
        let auth = Authenticator::new(creds());
        let uri = "rtsp://host/stream";
        let ha1 = md5_hex(format!(
            "{}:{}:{}",
            creds().username,
            DEFAULT_REALM,
            creds().password
        ));
        let ha2 = md5_hex(format!("DESCRIBE:{}", uri));
        let response = md5_hex(format!("{}:{}:{}", ha1, auth.nonce, ha2));
        let header = format!(
            "Digest username=\"admin\", realm=\"SharpRTSPServer\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            auth.nonce, uri, response
        );
        assert_eq!(
            auth.verify("DESCRIBE", uri, Some(&header)),
            AuthOutcome::Authorized
        );
    }

    #[test]
    fn wrong_response_is_invalid() {
        let auth = Authenticator::new(creds());
        let header = format!(
            "Digest username=\"admin\", realm=\"SharpRTSPServer\", nonce=\"{}\", uri=\"rtsp://host/\", response=\"deadbeef\"",
            auth.nonce
        );
        assert_eq!(
            auth.verify("DESCRIBE", "rtsp://host/", Some(&header)),
            AuthOutcome::Invalid
        );
    }

    #[test]
    fn basic_auth_round_trip() {
        let auth = Authenticator::with_scheme(creds(), Scheme::Basic);
        let encoded = BASE64_STANDARD.encode("admin:hunter2");
        let header = format!("Basic {}", encoded);
        assert_eq!(
            auth.verify("OPTIONS", "rtsp://host/", Some(&header)),
            AuthOutcome::Authorized
        );
    }
}
