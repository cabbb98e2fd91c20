//! Per-session authentication state

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use pmosoap::{RawRequest, RequestHooks};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::digest::{DigestChallenge, DigestNegotiator, client_nonce, parse_www_authenticate};
use crate::errors::Fault;

const REQUEST_METHOD: &str = "POST";

/// Authentication method selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Basic credentials only
    Basic,
    /// Digest when the device offers it, Basic otherwise
    #[default]
    Both,
    /// Digest only
    Digest,
}

/// How one request is authenticated. A digest plan keeps the challenge it
/// was prepared with, whatever happens to the cache before the request is
/// signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthPlan {
    Anonymous,
    Basic,
    Digest(DigestChallenge),
}

struct AuthState {
    method: AuthMethod,
    challenge: Option<DigestChallenge>,
    nonce_count: u32,
}

/// Credentials, cached challenge and nonce counter of one session.
///
/// The challenge and the counter live under the same lock.
pub(crate) struct Authenticator {
    username: String,
    password: String,
    configured: AuthMethod,
    negotiator: DigestNegotiator,
    state: Mutex<AuthState>,
}

impl Authenticator {
    pub(crate) fn new(
        username: &str,
        password: &str,
        method: AuthMethod,
        negotiator: DigestNegotiator,
    ) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            configured: method,
            negotiator,
            state: Mutex::new(AuthState {
                method,
                challenge: None,
                nonce_count: 0,
            }),
        }
    }

    /// Decides how the request to `url` (path `path`) is authenticated,
    /// probing for a challenge when needed. Blocks for the probe only.
    pub(crate) fn prepare(&self, url: &str, path: &str) -> Result<AuthPlan, Fault> {
        if self.username.is_empty() {
            return Ok(AuthPlan::Anonymous);
        }

        let method = {
            let state = self.state.lock();
            match state.method {
                AuthMethod::Basic => return Ok(AuthPlan::Basic),
                method => {
                    let reusable = state.challenge.as_ref().filter(|c| {
                        c.uri == path && c.method == REQUEST_METHOD && !(method == AuthMethod::Digest && c.stale)
                    });
                    if let Some(challenge) = reusable {
                        return Ok(AuthPlan::Digest(challenge.clone()));
                    }
                    method
                }
            }
        };

        // A stale challenge is solicited again once, never more
        let mut challenge = self.solicit(url, path);
        if challenge.as_ref().is_some_and(|c| c.stale) {
            debug!(url = %url, "Stale challenge received, probing once more");
            challenge = self.solicit(url, path).filter(|c| !c.stale);
        }

        let mut state = self.state.lock();
        match challenge {
            Some(challenge) => {
                debug!(url = %url, realm = %challenge.realm, "Digest challenge cached");
                state.challenge = Some(challenge.clone());
                Ok(AuthPlan::Digest(challenge))
            }
            None if method == AuthMethod::Digest => {
                state.challenge = None;
                Err(Fault::no_realm())
            }
            None => {
                info!(url = %url, "No digest challenge offered, falling back to basic authentication");
                state.method = AuthMethod::Basic;
                state.challenge = None;
                Ok(AuthPlan::Basic)
            }
        }
    }

    fn solicit(&self, url: &str, path: &str) -> Option<DigestChallenge> {
        let params = self.negotiator.negotiate(url)?;
        DigestChallenge::from_params(&params, REQUEST_METHOD, path)
            .map(|c| c.with_credentials(&self.username, &self.password))
    }

    fn basic_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }

    /// Digest header for one request, signed with `challenge`; bumps the
    /// nonce counter
    fn digest_header(&self, challenge: &DigestChallenge, body: &[u8]) -> String {
        let mut state = self.state.lock();
        state.nonce_count = state.nonce_count.wrapping_add(1);
        challenge.authorization(state.nonce_count, &client_nonce(), body)
    }

    /// Feeds a 401 reply back into the cached state
    pub(crate) fn on_unauthorized(&self, www_authenticate: Option<&str>) {
        let mut state = self.state.lock();
        if state.challenge.is_none() {
            return;
        }

        let stale = www_authenticate
            .and_then(parse_www_authenticate)
            .is_some_and(|p| p.get("stale").is_some_and(|s| s.eq_ignore_ascii_case("true")));

        if state.method == AuthMethod::Digest && stale {
            debug!("Cached digest challenge is stale");
            if let Some(challenge) = state.challenge.as_mut() {
                challenge.stale = true;
            }
        } else {
            warn!("Request rejected, discarding cached digest challenge");
            state.challenge = None;
        }
    }

    /// Back to the configured method, nothing cached
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        state.method = self.configured;
        state.challenge = None;
        state.nonce_count = 0;
    }

    pub(crate) fn current_method(&self) -> AuthMethod {
        self.state.lock().method
    }

    pub(crate) fn nonce_count(&self) -> u32 {
        self.state.lock().nonce_count
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("username", &self.username)
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

/// Pre-send hook posting the `Authorization` header
pub(crate) struct AuthHook {
    authenticator: Arc<Authenticator>,
    plan: AuthPlan,
}

impl AuthHook {
    pub(crate) fn new(authenticator: Arc<Authenticator>, plan: AuthPlan) -> Self {
        Self {
            authenticator,
            plan,
        }
    }
}

impl RequestHooks for AuthHook {
    fn mutate_request(&self, mut request: RawRequest) -> RawRequest {
        let header = match &self.plan {
            AuthPlan::Anonymous => return request,
            AuthPlan::Basic => self.authenticator.basic_header(),
            AuthPlan::Digest(challenge) => self.authenticator.digest_header(challenge, &request.body),
        };
        request.set_header("Authorization", header);
        request
    }

    fn inspect_raw_bytes(&self, data: Vec<u8>) -> Vec<u8> {
        trace!(reply = %String::from_utf8_lossy(&data), "Raw SOAP reply");
        data
    }
}
