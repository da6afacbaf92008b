//! Engine configuration.

use std::time::Duration;

/// How long after an import starts that smaller subscription snapshots are distrusted.
pub const DEFAULT_IMPORT_RACE_WINDOW: Duration = Duration::from_secs(15);

/// Maximum age of a cached identity snapshot usable for offline startup.
pub const DEFAULT_OFFLINE_IDENTITY_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunables for [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Window after an import start in which a snapshot with fewer items than the
    /// local mirror is discarded instead of applied.
    pub import_race_window: Duration,
    /// Cached identities older than this are ignored by the offline startup path.
    pub offline_identity_max_age: Duration,
    /// Persist remote writes that could not be delivered and replay them when the
    /// client comes back online.
    pub durable_outbox: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            import_race_window: DEFAULT_IMPORT_RACE_WINDOW,
            offline_identity_max_age: DEFAULT_OFFLINE_IDENTITY_MAX_AGE,
            durable_outbox: true,
        }
    }
}

impl HubConfig {
    pub fn import_race_window_ms(&self) -> u64 {
        self.import_race_window.as_millis() as u64
    }

    pub fn offline_identity_max_age_ms(&self) -> u64 {
        self.offline_identity_max_age.as_millis() as u64
    }
}
