//! Presentation seam: what the engine hands to whatever draws the lists.

use crate::item::Item;
use crate::list::{ItemShape, ListKind};
use std::fmt::{self, Display, Formatter};

/// The last-updated line shown under a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastUpdated {
    /// A verified identity is active; the remote collection is the source of truth.
    CloudSync,
    At(String),
    Never,
}

impl Display for LastUpdated {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LastUpdated::CloudSync => f.write_str("Last updated: Cloud Sync"),
            LastUpdated::At(at) => write!(f, "Last updated: {}", at),
            LastUpdated::Never => f.write_str("Last updated: Never"),
        }
    }
}

/// A list as it should be drawn right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListView {
    pub list: ListKind,
    pub items: Vec<Item>,
    pub last_updated: LastUpdated,
}

impl ListView {
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.name.as_str()).collect()
    }
}

/// The remote write a notice refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Add,
    Update,
    Delete,
    Clear,
    Toggle,
}

impl WriteAction {
    fn verb(self) -> &'static str {
        match self {
            WriteAction::Add => "add",
            WriteAction::Update => "update",
            WriteAction::Delete => "delete",
            WriteAction::Clear => "clear",
            WriteAction::Toggle => "update the status of",
        }
    }
}

/// A dismissable message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Duplicate {
        list: ListKind,
        name: String,
        /// Found in the remote collection rather than the local mirror.
        remote: bool,
    },
    LoginRequired,
    VerificationRequired,
    Connectivity {
        list: ListKind,
        action: WriteAction,
        item: Option<String>,
    },
    LoadFailed {
        list: ListKind,
    },
    NotYetSynced {
        name: String,
    },
    ReorderVisualOnly,
    ImportSucceeded {
        added: usize,
        skipped: usize,
    },
    ImportFailed {
        reason: String,
    },
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::Duplicate { list, .. } if list.shape() == ItemShape::Bookmark => {
                "Duplicate Bookmark"
            }
            Notice::Duplicate { .. } => "Duplicate Entry",
            Notice::LoginRequired => "Login Required",
            Notice::VerificationRequired => "Email Verification Required",
            Notice::Connectivity { .. } | Notice::LoadFailed { .. } => "Connection Error",
            Notice::NotYetSynced { .. } => "Sync Warning",
            Notice::ReorderVisualOnly => "Reorder",
            Notice::ImportSucceeded { .. } => "Import Successful",
            Notice::ImportFailed { .. } => "Import Error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notice::Duplicate {
                list,
                name,
                remote: false,
            } => match list.shape() {
                ItemShape::Bookmark => format!(
                    "A bookmark named \"{}\" with this URL already exists locally!",
                    name
                ),
                _ => format!("\"{}\" already exists in your list!", name),
            },
            Notice::Duplicate {
                name, remote: true, ..
            } => format!(
                "\"{}\" already exists in your cloud list! The next sync will restore the cloud copy.",
                name
            ),
            Notice::LoginRequired => {
                "Please log in to save and sync your data with the cloud.".to_string()
            }
            Notice::VerificationRequired => "Your email address is not verified. \
                Please verify your email to enable cloud saving and synchronization."
                .to_string(),
            Notice::Connectivity {
                list,
                action,
                item: Some(item),
            } => format!(
                "Failed to {} \"{}\" in the cloud ({}). Local change will persist temporarily.",
                action.verb(),
                item,
                list
            ),
            Notice::Connectivity { list, action, .. } => format!(
                "Failed to {} {} in the cloud. Local change will persist temporarily.",
                action.verb(),
                list
            ),
            Notice::LoadFailed { list } => {
                format!("Could not load {} from cloud. Displaying local data.", list)
            }
            Notice::NotYetSynced { name } => format!(
                "\"{}\" was not yet synced to the cloud. This change will only be local.",
                name
            ),
            Notice::ReorderVisualOnly => "Drag and drop reordering is visual only in cloud mode."
                .to_string(),
            Notice::ImportSucceeded { added, skipped } => format!(
                "Data merged successfully! {} added, {} skipped.",
                added, skipped
            ),
            Notice::ImportFailed { reason } => format!(
                "Failed to import data. Please ensure it's a valid JSON file. ({})",
                reason
            ),
        }
    }
}

impl Display for Notice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.message())
    }
}

pub trait Presenter: Send + Sync {
    /// Draw `view`, replacing whatever the list showed before.
    fn render(&self, view: &ListView);

    fn notify(&self, notice: &Notice);

    /// The list is empty locally and a remote snapshot is on its way.
    fn loading(&self, _list: ListKind) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_title_depends_on_shape() {
        let bookmark = Notice::Duplicate {
            list: ListKind::ToolsBookmarks,
            name: "Docs".into(),
            remote: false,
        };
        let note = Notice::Duplicate {
            list: ListKind::Notes,
            name: "A".into(),
            remote: true,
        };
        assert_eq!(bookmark.title(), "Duplicate Bookmark");
        assert_eq!(note.title(), "Duplicate Entry");
        assert!(note.message().contains("cloud list"));
    }

    #[test]
    fn test_connectivity_message_names_item() {
        let notice = Notice::Connectivity {
            list: ListKind::Projects,
            action: WriteAction::Add,
            item: Some("Hub".into()),
        };
        assert_eq!(
            notice.message(),
            "Failed to add \"Hub\" in the cloud (projects). Local change will persist temporarily."
        );
    }

    #[test]
    fn test_last_updated_display() {
        assert_eq!(LastUpdated::CloudSync.to_string(), "Last updated: Cloud Sync");
        assert_eq!(LastUpdated::Never.to_string(), "Last updated: Never");
    }
}
