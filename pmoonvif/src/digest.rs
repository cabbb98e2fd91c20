//! HTTP Digest (RFC 2617) challenge harvesting and response computation

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use md5::{Digest, Md5};
use tracing::{debug, warn};

/// Extra wait on top of the probe timeout before giving up on the probe thread
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Digest algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Md5,
    Md5Sess,
}

impl Algorithm {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Some(Algorithm::Md5),
            "MD5-SESS" => Some(Algorithm::Md5Sess),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => "MD5-sess",
        }
    }
}

/// Quality of protection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }

    /// `auth` is preferred when the server offers both
    fn choose(offered: &str) -> Option<Self> {
        let options: Vec<&str> = offered.split(',').map(str::trim).collect();
        if options.iter().any(|o| o.eq_ignore_ascii_case("auth")) {
            Some(Qop::Auth)
        } else if options.iter().any(|o| o.eq_ignore_ascii_case("auth-int")) {
            Some(Qop::AuthInt)
        } else {
            None
        }
    }
}

/// Parses a `WWW-Authenticate: Digest ...` header into a lowercase-keyed map.
///
/// Returns `None` unless the scheme is Digest and both `realm` and `nonce`
/// are present.
pub fn parse_www_authenticate(header: &str) -> Option<HashMap<String, String>> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return None;
    }

    let mut params = HashMap::new();
    for part in split_params(rest) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().trim_matches('"').trim();
        if !key.is_empty() {
            params.insert(key, value.to_string());
        }
    }

    if !params.contains_key("realm") || !params.contains_key("nonce") {
        debug!(header = %header, "Digest challenge without realm or nonce");
        return None;
    }

    Some(params)
}

/// Splits on commas that are outside quoted strings
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);

    parts
}

/// Cached challenge plus the credentials and request it applies to
#[derive(Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<Qop>,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    pub stale: bool,
    pub username: String,
    pub password: String,
    pub method: String,
    pub uri: String,
}

impl DigestChallenge {
    /// Builds a challenge from parsed header parameters.
    ///
    /// Unsupported algorithms yield `None`.
    pub fn from_params(params: &HashMap<String, String>, method: &str, uri: &str) -> Option<Self> {
        let algorithm = match params.get("algorithm") {
            Some(value) => match Algorithm::parse(value) {
                Some(algorithm) => algorithm,
                None => {
                    warn!(algorithm = %value, "Unsupported digest algorithm");
                    return None;
                }
            },
            None => Algorithm::Md5,
        };

        Some(Self {
            realm: params.get("realm")?.clone(),
            nonce: params.get("nonce")?.clone(),
            qop: params.get("qop").and_then(|q| Qop::choose(q)),
            opaque: params.get("opaque").cloned(),
            algorithm,
            stale: params
                .get("stale")
                .is_some_and(|s| s.eq_ignore_ascii_case("true")),
            username: String::new(),
            password: String::new(),
            method: method.to_string(),
            uri: uri.to_string(),
        })
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Request digest for nonce count `nc`, client nonce `cnonce` and
    /// request `body` (used by `auth-int` only)
    pub fn response(&self, nc: u32, cnonce: &str, body: &[u8]) -> String {
        let mut ha1 = md5_hex(&[&self.username, ":", &self.realm, ":", &self.password]);
        if self.algorithm == Algorithm::Md5Sess {
            ha1 = md5_hex(&[&ha1, ":", &self.nonce, ":", cnonce]);
        }

        let ha2 = match self.qop {
            Some(Qop::AuthInt) => {
                let body_hash = md5_bytes_hex(body);
                md5_hex(&[&self.method, ":", &self.uri, ":", &body_hash])
            }
            _ => md5_hex(&[&self.method, ":", &self.uri]),
        };

        match self.qop {
            Some(qop) => md5_hex(&[
                &ha1,
                ":",
                &self.nonce,
                ":",
                &format!("{:08x}", nc),
                ":",
                cnonce,
                ":",
                qop.as_str(),
                ":",
                &ha2,
            ]),
            None => md5_hex(&[&ha1, ":", &self.nonce, ":", &ha2]),
        }
    }

    /// Full `Authorization` header value
    pub fn authorization(&self, nc: u32, cnonce: &str, body: &[u8]) -> String {
        let response = self.response(nc, cnonce, body);

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}", algorithm={}"#,
            self.username,
            self.realm,
            self.nonce,
            self.uri,
            response,
            self.algorithm.as_str()
        );
        if let Some(qop) = self.qop {
            header.push_str(&format!(
                r#", qop={}, nc={:08x}, cnonce="{}""#,
                qop.as_str(),
                nc,
                cnonce
            ));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{}""#, opaque));
        }

        header
    }
}

impl fmt::Debug for DigestChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestChallenge")
            .field("realm", &self.realm)
            .field("nonce", &self.nonce)
            .field("qop", &self.qop)
            .field("opaque", &self.opaque)
            .field("algorithm", &self.algorithm)
            .field("stale", &self.stale)
            .field("username", &self.username)
            .field("password", &"***")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .finish()
    }
}

/// Fresh client nonce
pub fn client_nonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn md5_bytes_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Source of `WWW-Authenticate` challenges
pub trait ChallengeProbe: Send + Sync {
    /// Raw Digest header of the 401 reply to an unauthenticated POST
    fn www_authenticate(&self, url: &str, timeout: Duration) -> Option<String>;
}

/// Probe over HTTP, one fresh agent per call
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpChallengeProbe;

impl ChallengeProbe for HttpChallengeProbe {
    fn www_authenticate(&self, url: &str, timeout: Duration) -> Option<String> {
        match pmosoap::probe_www_authenticate(url, timeout) {
            Ok(header) => header,
            Err(e) => {
                debug!(url = %url, error = %e, "Digest probe failed");
                None
            }
        }
    }
}

/// One-shot challenge negotiation.
///
/// The probe runs on its own thread; the caller blocks on a bounded wait
/// and never sees an error, only a challenge map or nothing.
#[derive(Clone)]
pub struct DigestNegotiator {
    probe: Arc<dyn ChallengeProbe>,
    timeout: Duration,
}

impl DigestNegotiator {
    pub fn new(probe: Arc<dyn ChallengeProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    pub fn negotiate(&self, url: &str) -> Option<HashMap<String, String>> {
        let (tx, rx) = bounded(1);
        let probe = self.probe.clone();
        let target = url.to_string();
        let timeout = self.timeout;

        let spawned = thread::Builder::new()
            .name("onvif-digest-probe".into())
            .spawn(move || {
                let _ = tx.send(probe.www_authenticate(&target, timeout));
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Cannot spawn digest probe thread");
            return None;
        }

        match rx.recv_timeout(self.timeout + PROBE_GRACE) {
            Ok(Some(header)) => {
                let params = parse_www_authenticate(&header);
                debug!(url = %url, found = params.is_some(), "Digest probe finished");
                params
            }
            Ok(None) => {
                debug!(url = %url, "Digest probe returned no challenge");
                None
            }
            Err(_) => {
                warn!(url = %url, "Digest probe timed out");
                None
            }
        }
    }
}
