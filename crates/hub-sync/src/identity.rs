//! Identity and the verification gate in front of every remote call.

use crate::mirror::{LocalMirror, OFFLINE_IDENTITY_KEY};
use crate::store;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The authenticated principal as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            email_verified: false,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn verified(mut self) -> Self {
        self.email_verified = true;
        self
    }
}

/// Where the current session's identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentitySource {
    #[default]
    Provider,
    /// Seeded from the cached snapshot because the client started offline.
    OfflineCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Unverified(Identity),
    Verified(Identity),
}

impl SessionState {
    pub fn from_identity(identity: Option<Identity>) -> Self {
        match identity {
            None => SessionState::Anonymous,
            Some(id) if id.email_verified => SessionState::Verified(id),
            Some(id) => SessionState::Unverified(id),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Anonymous => None,
            SessionState::Unverified(id) | SessionState::Verified(id) => Some(id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, SessionState::Anonymous)
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, SessionState::Verified(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Unverified(_) => "unverified",
            SessionState::Verified(_) => "verified",
        }
    }
}

/// Whether remote work may proceed for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteGate {
    Open(Identity),
    LoginRequired,
    VerificationRequired,
    /// Verified identity restored from the offline cache; changes stay local until the
    /// provider confirms the session.
    CachedOffline(Identity),
}

impl RemoteGate {
    pub fn evaluate(state: &SessionState, source: IdentitySource) -> Self {
        match (state, source) {
            (SessionState::Anonymous, _) => RemoteGate::LoginRequired,
            (SessionState::Unverified(_), _) => RemoteGate::VerificationRequired,
            (SessionState::Verified(id), IdentitySource::Provider) => RemoteGate::Open(id.clone()),
            (SessionState::Verified(id), IdentitySource::OfflineCache) => {
                RemoteGate::CachedOffline(id.clone())
            }
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RemoteGate::Open(_))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedIdentity {
    #[serde(flatten)]
    identity: Identity,
    timestamp: u64,
}

/// Remember `identity` for a later offline startup.
pub fn cache_identity(mirror: &LocalMirror, identity: &Identity, now_ms: u64) -> store::Result<()> {
    let record = CachedIdentity {
        identity: identity.clone(),
        timestamp: now_ms,
    };
    let json =
        serde_json::to_string(&record).map_err(|e| store::StoreError::Io(e.to_string()))?;
    mirror.set_raw(OFFLINE_IDENTITY_KEY, &json)
}

pub fn clear_cached_identity(mirror: &LocalMirror) -> store::Result<()> {
    mirror.remove_raw(OFFLINE_IDENTITY_KEY)
}

/// The cached identity, if one exists and is younger than `max_age_ms`.
pub fn cached_identity(mirror: &LocalMirror, now_ms: u64, max_age_ms: u64) -> Option<Identity> {
    let raw = mirror.raw(OFFLINE_IDENTITY_KEY).ok().flatten()?;
    let record: CachedIdentity = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(e) => {
            warn!("Ignoring unreadable cached identity: {}", e);
            return None;
        }
    };

    if now_ms.saturating_sub(record.timestamp) >= max_age_ms {
        debug!("Cached identity for {} is stale", record.identity.uid);
        return None;
    }
    Some(record.identity)
}
