//! Item records and the shapes they arrive in.
//!
//! Older mirrors stored plain strings instead of objects, and older exports carry
//! remote timestamps as `{seconds, nanoseconds}`. Both are accepted here and
//! normalized to [`Item`] so nothing deeper in the engine branches on runtime shape.

use crate::list::{ItemShape, ListKind};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Server-assigned ordering key, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ServerTimestamp(pub u64);

impl<'de> Deserialize<'de> for ServerTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Millis(u64),
            Fractional(f64),
            Legacy {
                seconds: i64,
                #[serde(default)]
                nanoseconds: i64,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Millis(ms) => ServerTimestamp(ms),
            Repr::Fractional(ms) => ServerTimestamp(ms.max(0.0) as u64),
            Repr::Legacy {
                seconds,
                nanoseconds,
            } => {
                let ms = seconds
                    .saturating_mul(1000)
                    .saturating_add(nanoseconds / 1_000_000);
                ServerTimestamp(ms.max(0) as u64)
            }
        })
    }
}

/// An item as held in the local mirror.
///
/// `id` and `timestamp` are present once the remote collection has confirmed the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<ServerTimestamp>,
}

impl Item {
    pub fn named(name: impl Into<String>) -> Self {
        Self::from_fields(ItemFields::named(name))
    }

    pub fn from_fields(fields: ItemFields) -> Self {
        Self {
            id: None,
            name: fields.name,
            completed: fields.completed,
            url: fields.url,
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Whether the remote collection has assigned this item an id.
    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }

    pub fn key(&self, shape: ItemShape) -> DuplicateKey {
        DuplicateKey::for_shape(shape, &self.name, self.url.as_deref())
    }

    pub fn fields(&self) -> ItemFields {
        ItemFields {
            name: self.name.clone(),
            completed: self.completed,
            url: self.url.clone(),
        }
    }
}

/// A stored list entry: either a legacy plain name or a structured item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredItem {
    PlainName(String),
    Structured(Item),
}

impl From<StoredItem> for Item {
    fn from(stored: StoredItem) -> Self {
        match stored {
            StoredItem::PlainName(name) => Item::named(name),
            StoredItem::Structured(item) => item,
        }
    }
}

/// Parse a stored list, normalizing legacy entries.
pub fn parse_items(value: serde_json::Value) -> serde_json::Result<Vec<Item>> {
    let stored: Vec<StoredItem> = serde_json::from_value(value)?;
    Ok(stored.into_iter().map(Item::from).collect())
}

/// The fields a remote document carries besides its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ItemFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            completed: None,
            url: None,
        }
    }

    pub fn key(&self, shape: ItemShape) -> DuplicateKey {
        DuplicateKey::for_shape(shape, &self.name, self.url.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Bookmark URL must not be empty")]
    EmptyUrl,

    #[error("{0} has no status counterpart")]
    NoStatusCounterpart(ListKind),
}

/// User input for an add or update, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDraft {
    pub name: String,
    pub completed: Option<bool>,
    pub url: Option<String>,
}

impl ItemDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn bookmark(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Validate and shape the draft for `list`.
    ///
    /// Anime lists default `completed` to whether the list is the completed half;
    /// bookmark lists require a url; other lists drop any url and completion flag.
    pub fn normalize(self, list: ListKind) -> Result<ItemFields, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        match list.shape() {
            ItemShape::Simple => Ok(ItemFields::named(name)),
            ItemShape::Anime => Ok(ItemFields {
                name,
                completed: Some(self.completed.unwrap_or(list == ListKind::Completed)),
                url: None,
            }),
            ItemShape::Bookmark => {
                let url = self.url.as_deref().map(str::trim).unwrap_or_default();
                if url.is_empty() {
                    return Err(ValidationError::EmptyUrl);
                }
                Ok(ItemFields {
                    name,
                    completed: None,
                    url: Some(url.to_string()),
                })
            }
        }
    }
}

impl From<Item> for ItemDraft {
    fn from(item: Item) -> Self {
        Self {
            name: item.name,
            completed: item.completed,
            url: item.url,
        }
    }
}

impl From<StoredItem> for ItemDraft {
    fn from(stored: StoredItem) -> Self {
        Item::from(stored).into()
    }
}

/// What must be unique within a list: the name, or for bookmarks the name+url pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DuplicateKey {
    Name(String),
    NameUrl { name: String, url: String },
}

impl DuplicateKey {
    pub fn for_shape(shape: ItemShape, name: &str, url: Option<&str>) -> Self {
        match shape {
            ItemShape::Bookmark => DuplicateKey::NameUrl {
                name: name.to_string(),
                url: url.unwrap_or_default().to_string(),
            },
            ItemShape::Simple | ItemShape::Anime => DuplicateKey::Name(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DuplicateKey::Name(name) | DuplicateKey::NameUrl { name, .. } => name,
        }
    }

    pub fn matches(&self, fields: &ItemFields) -> bool {
        match self {
            DuplicateKey::Name(name) => &fields.name == name,
            DuplicateKey::NameUrl { name, url } => {
                &fields.name == name && fields.url.as_deref() == Some(url.as_str())
            }
        }
    }
}

impl Display for DuplicateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateKey::Name(name) => write!(f, "{}", name),
            DuplicateKey::NameUrl { name, url } => write!(f, "{} ({})", name, url),
        }
    }
}
