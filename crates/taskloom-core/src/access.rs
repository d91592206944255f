//! Authorization hook for run triggers.
//!
//! The engine does not decide who may drain a queue. Trigger surfaces build
//! an [`AccessRequest`] from whatever credentials arrived and ask the host's
//! [`AccessPolicy`]. A denied request must not reach `Runner::run`.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Credentials presented by a trigger.
#[derive(Debug, Clone, Default)]
pub struct AccessRequest {
    /// Token from `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
    /// Value of the `X-Taskloom-Secret` header.
    pub secret_header: Option<String>,
    /// An authenticated user, if the host resolved one upstream.
    pub principal: Option<String>,
}

impl AccessRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn secret_header(mut self, secret: impl Into<String>) -> Self {
        self.secret_header = Some(secret.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Every presented secret-like credential, header first.
    fn secrets(&self) -> impl Iterator<Item = &str> {
        self.secret_header
            .as_deref()
            .into_iter()
            .chain(self.bearer.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Host-supplied authorization check gating `run()`.
pub trait AccessPolicy: Send + Sync + fmt::Debug {
    fn authorize(&self, request: &AccessRequest) -> AccessDecision;
}

/// Allows requests carrying the configured shared secret.
///
/// Both sides are hashed to fixed-length SHA-256 digests before comparison so
/// the check does not leak the secret's length or a matching prefix.
pub struct SharedSecretPolicy {
    digest: [u8; 32],
}

impl SharedSecretPolicy {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            digest: digest(secret.as_ref()),
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        let candidate = digest(candidate.as_bytes());
        self.digest
            .iter()
            .zip(candidate.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for SharedSecretPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretPolicy").finish_non_exhaustive()
    }
}

impl AccessPolicy for SharedSecretPolicy {
    fn authorize(&self, request: &AccessRequest) -> AccessDecision {
        let mut presented = false;
        for secret in request.secrets() {
            presented = true;
            if self.matches(secret) {
                return AccessDecision::Allow;
            }
        }
        if presented {
            AccessDecision::Deny("invalid run secret".to_string())
        } else {
            AccessDecision::Deny("missing run secret".to_string())
        }
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// Allows any request with a resolved principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAuthenticated;

impl AccessPolicy for AllowAuthenticated {
    fn authorize(&self, request: &AccessRequest) -> AccessDecision {
        match request.principal.as_deref() {
            Some(p) if !p.is_empty() => AccessDecision::Allow,
            _ => AccessDecision::Deny("not authenticated".to_string()),
        }
    }
}

/// Allows everything. For local development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _request: &AccessRequest) -> AccessDecision {
        AccessDecision::Allow
    }
}

/// Denies everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl AccessPolicy for DenyAll {
    fn authorize(&self, _request: &AccessRequest) -> AccessDecision {
        AccessDecision::Deny("run trigger disabled".to_string())
    }
}

/// Allows when any inner policy allows. Denies with the last reason otherwise.
#[derive(Debug, Clone)]
pub struct AnyOf {
    policies: Vec<Arc<dyn AccessPolicy>>,
}

impl AccessPolicy for AnyOf {
    fn authorize(&self, request: &AccessRequest) -> AccessDecision {
        let mut last = AccessDecision::Deny("no access policy configured".to_string());
        for policy in &self.policies {
            match policy.authorize(request) {
                AccessDecision::Allow => return AccessDecision::Allow,
                deny => last = deny,
            }
        }
        last
    }
}

pub fn any_of(policies: Vec<Arc<dyn AccessPolicy>>) -> AnyOf {
    AnyOf { policies }
}
