//! The Local Mirror: every list's durable on-device snapshot.
//!
//! Reads always come from here. A list that is absent reads as empty; a list that
//! fails to parse also reads as empty (and is logged) so a corrupted key can never
//! take the UI down with it.

use crate::item::{Item, parse_items};
use crate::list::ListKind;
use crate::store::{KeyValueStore, Result};
use chrono::{Local, TimeZone};
use std::sync::Arc;
use tracing::{debug, error};

pub const VAULT_PASSWORD_KEY: &str = "vaultPassword";
pub const VAULT_FAILED_ATTEMPTS_KEY: &str = "vaultFailedAttempts";
pub const OUTBOX_KEY: &str = "pendingSync";
pub const OFFLINE_IDENTITY_KEY: &str = "offlineUser";

/// Format of the human-readable last-updated marker, e.g. `Oct 16, 2026, 3:04 PM`.
const LAST_UPDATED_FORMAT: &str = "%b %-d, %Y, %-I:%M %p";

/// Keys carried by export, in a stable order.
pub fn export_keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = ListKind::ALL
        .iter()
        .flat_map(|l| [l.storage_key(), l.last_updated_key()])
        .collect();
    keys.push(VAULT_PASSWORD_KEY);
    keys.push(VAULT_FAILED_ATTEMPTS_KEY);
    keys
}

/// Render `now_ms` as a local-time last-updated marker.
pub fn format_last_updated(now_ms: u64) -> String {
    match Local.timestamp_millis_opt(now_ms as i64).single() {
        Some(at) => at.format(LAST_UPDATED_FORMAT).to_string(),
        None => String::from("Never"),
    }
}

#[derive(Clone)]
pub struct LocalMirror {
    store: Arc<dyn KeyValueStore>,
}

impl LocalMirror {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn list(&self, kind: ListKind) -> Vec<Item> {
        let raw = match self.store.get(kind.storage_key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!("Failed to read {}: {}", kind.storage_key(), e);
                return Vec::new();
            }
        };

        let parsed = serde_json::from_str(&raw).and_then(parse_items);
        match parsed {
            Ok(items) => items,
            Err(e) => {
                error!("Discarding unparsable {}: {}", kind.storage_key(), e);
                Vec::new()
            }
        }
    }

    /// Persist `items` and stamp the list's last-updated marker.
    pub fn save(&self, kind: ListKind, items: &[Item], now_ms: u64) -> Result<()> {
        let json = serde_json::to_string(items)
            .map_err(|e| crate::store::StoreError::Io(e.to_string()))?;
        self.store.set(kind.storage_key(), &json)?;
        self.store
            .set(kind.last_updated_key(), &format_last_updated(now_ms))?;
        debug!("Saved {} items to {}", items.len(), kind.storage_key());
        Ok(())
    }

    pub fn last_updated(&self, kind: ListKind) -> Option<String> {
        self.store.get(kind.last_updated_key()).ok().flatten()
    }

    pub fn remove_list(&self, kind: ListKind) -> Result<()> {
        self.store.remove(kind.storage_key())?;
        self.store.remove(kind.last_updated_key())
    }

    /// Remove every list, every marker and the vault password.
    pub fn wipe_lists(&self) -> Result<()> {
        for kind in ListKind::ALL {
            self.remove_list(kind)?;
        }
        self.store.remove(VAULT_PASSWORD_KEY)
    }

    /// Remove every list, every marker, the vault keys, the outbox and the cached identity.
    pub fn wipe_all(&self) -> Result<()> {
        self.wipe_lists()?;
        for key in [VAULT_FAILED_ATTEMPTS_KEY, OUTBOX_KEY, OFFLINE_IDENTITY_KEY] {
            self.store.remove(key)?;
        }
        Ok(())
    }

    /// Remove the vault lists, their markers and the stored vault password.
    pub fn wipe_vault(&self) -> Result<()> {
        for kind in ListKind::ALL.into_iter().filter(|l| l.is_vault()) {
            self.remove_list(kind)?;
        }
        self.store.remove(VAULT_PASSWORD_KEY)?;
        self.store.remove(VAULT_FAILED_ATTEMPTS_KEY)
    }

    pub fn has_vault_password(&self) -> bool {
        matches!(self.store.get(VAULT_PASSWORD_KEY), Ok(Some(_)))
    }

    pub fn raw(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key)
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.store.set(key, value)
    }

    pub fn remove_raw(&self, key: &str) -> Result<()> {
        self.store.remove(key)
    }
}
