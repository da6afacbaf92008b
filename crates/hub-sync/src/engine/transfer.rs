//! Import merge and export.
//!
//! The file format is one JSON object keyed by local mirror storage keys. List values
//! are arrays, or (from older exports) strings holding an encoded array.

use super::{Result, SyncEngine, SyncError, lock};
use crate::events::HubEvent;
use crate::item::{ItemDraft, StoredItem};
use crate::list::{ItemShape, ListKind};
use crate::mirror::export_keys;
use crate::presenter::Notice;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    /// Duplicates and entries that failed validation.
    pub skipped: usize,
}

/// Clears the import flag when the import ends, however it ends.
struct ImportGuard<'a> {
    engine: &'a SyncEngine,
    completed: bool,
}

impl<'a> ImportGuard<'a> {
    fn begin(engine: &'a SyncEngine) -> Result<Self> {
        let mut import = lock(&engine.inner.import);
        if import.in_progress {
            return Err(SyncError::ImportInProgress);
        }
        import.in_progress = true;
        import.started_at_ms = Some(engine.now_ms());
        Ok(Self {
            engine,
            completed: false,
        })
    }
}

impl Drop for ImportGuard<'_> {
    fn drop(&mut self) {
        let mut import = lock(&self.engine.inner.import);
        import.in_progress = false;
        // A finished import keeps its start time so early snapshots stay distrusted.
        if !self.completed {
            import.started_at_ms = None;
        }
    }
}

/// Parse a list value, accepting the string-encoded form older exports used.
fn entries_of(key: &str, value: Value) -> Result<Vec<Value>> {
    let value = match value {
        Value::String(encoded) => serde_json::from_str(&encoded)
            .map_err(|e| SyncError::ImportFormat(format!("{}: {}", key, e)))?,
        other => other,
    };
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Null => Ok(Vec::new()),
        _ => Err(SyncError::ImportFormat(format!("{} is not a list", key))),
    }
}

fn draft_of(list: ListKind, entry: Value) -> Option<ItemDraft> {
    let stored: StoredItem = serde_json::from_value(entry).ok()?;
    let draft = ItemDraft::from(stored);
    if list.shape() == ItemShape::Bookmark && draft.url.as_deref().is_none_or(str::is_empty) {
        return None;
    }
    Some(draft)
}

impl SyncEngine {
    /// Export every known key present in the local mirror as a pretty JSON object.
    pub fn export(&self) -> Result<String> {
        let mut data = Map::new();
        for key in export_keys() {
            if let Some(raw) = self.inner.mirror.raw(key)? {
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                data.insert(key.to_string(), value);
            }
        }
        serde_json::to_string_pretty(&Value::Object(data))
            .map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Merge an exported payload into the current lists.
    ///
    /// Every entry goes through [`add`](SyncEngine::add) and its remote write is awaited,
    /// so duplicates are skipped and remote sync applies per item. Snapshots are ignored
    /// while this runs; afterwards every list is re-rendered from the local mirror.
    pub async fn import(&self, payload: &str) -> Result<ImportReport> {
        let result = self.merge(payload).await;

        self.render_all();
        match &result {
            Ok(report) => {
                info!("Import merged {} items ({} skipped)", report.added, report.skipped);
                self.notify(Notice::ImportSucceeded {
                    added: report.added,
                    skipped: report.skipped,
                });
            }
            Err(e) => {
                warn!("Import failed: {}", e);
                self.notify(Notice::ImportFailed {
                    reason: e.to_string(),
                });
            }
        }
        let report = result.as_ref().copied().unwrap_or_default();
        self.emit(HubEvent::ImportFinished {
            added: report.added,
            skipped: report.skipped,
            ok: result.is_ok(),
        });
        result
    }

    async fn merge(&self, payload: &str) -> Result<ImportReport> {
        let mut guard = ImportGuard::begin(self)?;

        let data: Map<String, Value> = match serde_json::from_str(payload) {
            Ok(Value::Object(data)) => data,
            Ok(_) => return Err(SyncError::ImportFormat("expected a JSON object".into())),
            Err(e) => return Err(SyncError::ImportFormat(e.to_string())),
        };

        let mut batches = Vec::new();
        for list in ListKind::ALL {
            let key = list.storage_key();
            if let Some(value) = data.get(key) {
                batches.push((list, entries_of(key, value.clone())?));
            }
        }

        let mut report = ImportReport::default();
        for (list, entries) in batches {
            for entry in entries {
                let Some(draft) = draft_of(list, entry) else {
                    report.skipped += 1;
                    continue;
                };
                match self.add(list, draft) {
                    Ok(write) => {
                        let outcome = write.await;
                        debug!("Imported into {}: {:?}", list, outcome);
                        report.added += 1;
                    }
                    Err(SyncError::Duplicate { .. } | SyncError::Validation(_)) => {
                        report.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        guard.completed = true;
        Ok(report)
    }
}
