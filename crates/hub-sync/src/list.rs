//! The closed set of lists the hub knows about, and the pages that show them.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Shape of the items a list holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemShape {
    /// `{ name }`
    Simple,
    /// `{ name, completed }` (the watching/completed split)
    Anime,
    /// `{ name, url }`
    Bookmark,
}

/// A known list. Each list has a local mirror key, a last-updated marker key and a
/// remote collection name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListKind {
    Watching,
    Completed,
    Projects,
    Upcoming,
    Accounts,
    Notes,
    ToolsBookmarks,
    EntertainmentBookmarks,
}

impl ListKind {
    /// Every list, generic lists first, in import order.
    pub const ALL: [ListKind; 8] = [
        ListKind::Watching,
        ListKind::Completed,
        ListKind::Projects,
        ListKind::Upcoming,
        ListKind::Accounts,
        ListKind::Notes,
        ListKind::ToolsBookmarks,
        ListKind::EntertainmentBookmarks,
    ];

    /// The type tag used by the UI (`watching`, `tools`, ...).
    pub fn tag(self) -> &'static str {
        match self {
            ListKind::Watching => "watching",
            ListKind::Completed => "completed",
            ListKind::Projects => "projects",
            ListKind::Upcoming => "upcoming",
            ListKind::Accounts => "accounts",
            ListKind::Notes => "notes",
            ListKind::ToolsBookmarks => "tools",
            ListKind::EntertainmentBookmarks => "entertainment",
        }
    }

    /// Key of the list in the local mirror.
    pub fn storage_key(self) -> &'static str {
        match self {
            ListKind::Watching => "watchingList",
            ListKind::Completed => "completedList",
            ListKind::Projects => "projectsList",
            ListKind::Upcoming => "upcomingList",
            ListKind::Accounts => "accountsList",
            ListKind::Notes => "notesList",
            ListKind::ToolsBookmarks => "bookmarks_tools",
            ListKind::EntertainmentBookmarks => "bookmarks_entertainment",
        }
    }

    /// Key of the human-readable "last updated" marker.
    pub fn last_updated_key(self) -> &'static str {
        match self {
            ListKind::Watching => "watchingLastUpdated",
            ListKind::Completed => "completedLastUpdated",
            ListKind::Projects => "projectsLastUpdated",
            ListKind::Upcoming => "upcomingLastUpdated",
            ListKind::Accounts => "accountsLastUpdated",
            ListKind::Notes => "notesLastUpdated",
            ListKind::ToolsBookmarks => "bookmarks_tools_lastUpdated",
            ListKind::EntertainmentBookmarks => "bookmarks_entertainment_lastUpdated",
        }
    }

    /// Name of the remote collection under `users/{uid}/`.
    pub fn collection_name(self) -> &'static str {
        match self {
            ListKind::Watching => "watching",
            ListKind::Completed => "completed",
            ListKind::Projects => "projects",
            ListKind::Upcoming => "upcoming",
            ListKind::Accounts => "accounts",
            ListKind::Notes => "notes",
            ListKind::ToolsBookmarks => "toolsBookmarks",
            ListKind::EntertainmentBookmarks => "entertainmentBookmarks",
        }
    }

    pub fn shape(self) -> ItemShape {
        match self {
            ListKind::Watching | ListKind::Completed => ItemShape::Anime,
            ListKind::ToolsBookmarks | ListKind::EntertainmentBookmarks => ItemShape::Bookmark,
            _ => ItemShape::Simple,
        }
    }

    /// Lists behind the vault password gate.
    pub fn is_vault(self) -> bool {
        matches!(self, ListKind::Accounts | ListKind::Notes)
    }

    /// The other half of a status split, if this list has one.
    pub fn status_counterpart(self) -> Option<ListKind> {
        match self {
            ListKind::Watching => Some(ListKind::Completed),
            ListKind::Completed => Some(ListKind::Watching),
            _ => None,
        }
    }

    /// Lists whose names must be unique together with this one.
    pub fn duplicate_scope(self) -> Vec<ListKind> {
        match self.status_counterpart() {
            Some(other) => vec![self, other],
            None => vec![self],
        }
    }

    pub fn from_storage_key(key: &str) -> Option<ListKind> {
        ListKind::ALL.into_iter().find(|l| l.storage_key() == key)
    }
}

impl Display for ListKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown list: {0}")]
pub struct UnknownList(pub String);

impl FromStr for ListKind {
    type Err = UnknownList;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ListKind::ALL
            .into_iter()
            .find(|l| l.tag() == lower || l.storage_key() == s || l.collection_name() == s)
            .ok_or_else(|| UnknownList(s.to_string()))
    }
}

/// A page of the hub and the lists it shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Page {
    Home,
    Anime,
    Projects,
    Vault,
    Bookmarks,
    Profile,
}

impl Page {
    pub fn lists(self) -> &'static [ListKind] {
        match self {
            Page::Anime => &[ListKind::Watching, ListKind::Completed],
            Page::Projects => &[ListKind::Projects, ListKind::Upcoming],
            Page::Vault => &[ListKind::Accounts, ListKind::Notes],
            Page::Bookmarks => &[ListKind::ToolsBookmarks, ListKind::EntertainmentBookmarks],
            Page::Home | Page::Profile => &[],
        }
    }
}
