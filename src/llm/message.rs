//! Role-tagged chat messages with text and binary attachments.
//!
//! Messages are also the payload that flows along the edges of the marketing
//! graph: each node prepends its structured result as a JSON attachment so
//! downstream nodes can pick it up by media type.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary attachment. The bytes are shared, so cloning a message is cheap.
#[derive(Clone, PartialEq)]
pub struct DataContent {
    pub name: Option<String>,
    pub media_type: String,
    pub bytes: Arc<[u8]>,
}

impl DataContent {
    pub fn new(bytes: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            name: None,
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Serialize `value` as JSON tagged `application/json+<type_name>`.
    pub fn json<T: Serialize>(value: &T, type_name: &str) -> Result<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(bytes, json_media_type(type_name)))
    }

    /// Deserialize a JSON attachment.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub fn is_text(&self) -> bool {
        self.media_type.starts_with("text/") || self.media_type.starts_with("application/json")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for DataContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContent")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Media type used for JSON attachments of a given type.
pub fn json_media_type(type_name: &str) -> String {
    format!("application/json+{}", type_name.to_lowercase())
}

/// One piece of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Data(DataContent),
}

/// A chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub contents: Vec<Content>,
}

impl ChatMessage {
    pub fn new(role: Role, contents: Vec<Content>) -> Self {
        Self { role, contents }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Content::Text(text.into())])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Content::Text(text.into())])
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.texts().collect::<Vec<_>>().join("\n")
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.contents.iter().filter_map(|c| match c {
            Content::Text(t) => Some(t.as_str()),
            Content::Data(_) => None,
        })
    }

    pub fn attachments(&self) -> impl Iterator<Item = &DataContent> {
        self.contents.iter().filter_map(|c| match c {
            Content::Data(d) => Some(d),
            Content::Text(_) => None,
        })
    }

    /// First attachment with exactly this name.
    pub fn find_named(&self, name: &str) -> Option<&DataContent> {
        self.attachments().find(|d| d.name.as_deref() == Some(name))
    }

    /// First attachment whose name starts with `prefix`.
    pub fn find_name_prefix(&self, prefix: &str) -> Option<&DataContent> {
        self.attachments()
            .find(|d| d.name.as_deref().is_some_and(|n| n.starts_with(prefix)))
    }

    /// First attachment with this media type (case-insensitive).
    pub fn find_media_type(&self, media_type: &str) -> Option<&DataContent> {
        self.attachments()
            .find(|d| d.media_type.eq_ignore_ascii_case(media_type))
    }

    /// First text part starting with `prefix`, with the prefix removed.
    pub fn find_text_value(&self, prefix: &str) -> Option<&str> {
        self.texts()
            .find_map(|t| t.strip_prefix(prefix))
            .map(str::trim)
    }

    /// Decode the first JSON attachment tagged for `type_name`.
    pub fn json_attachment<T: DeserializeOwned>(&self, type_name: &str) -> Result<T> {
        self.find_media_type(&json_media_type(type_name))
            .ok_or_else(|| Error::missing(format!("{type_name} attachment")))?
            .parse_json()
    }

    /// Copy of this message with `content` in front.
    pub fn prepended(&self, role: Role, content: Content) -> Self {
        let mut contents = Vec::with_capacity(self.contents.len() + 1);
        contents.push(content);
        contents.extend(self.contents.iter().cloned());
        Self::new(role, contents)
    }

    /// Fan-in merge: concatenates contents in arrival order.
    pub fn merged(acc: Option<Self>, next: Self) -> Self {
        match acc {
            None => Self::new(Role::Assistant, next.contents),
            Some(mut acc) => {
                acc.contents.extend(next.contents);
                acc
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Meta {
        title: String,
    }

    fn sample() -> ChatMessage {
        let meta = Meta {
            title: "Dunes".to_string(),
        };
        ChatMessage::new(
            Role::User,
            vec![
                Content::Text("PhotoId: abc ".to_string()),
                Content::Data(DataContent::new(vec![1, 2, 3], "image/jpeg").named("Photograph")),
                Content::Data(DataContent::json(&meta, "Meta").unwrap().named("Meta meta")),
            ],
        )
    }

    #[test]
    fn test_lookups() {
        let msg = sample();
        assert_eq!(msg.find_text_value("PhotoId: "), Some("abc"));
        assert_eq!(msg.find_named("Photograph").unwrap().len(), 3);
        assert!(msg.find_name_prefix("Meta").is_some());
        assert!(msg.find_named("Medium preview: Metal").is_none());

        let meta: Meta = msg.json_attachment("Meta").unwrap();
        assert_eq!(meta.title, "Dunes");
    }

    #[test]
    fn test_missing_json_attachment() {
        let msg = ChatMessage::user("hello");
        let err = msg.json_attachment::<Meta>("Meta").unwrap_err();
        assert!(matches!(err, Error::MissingData(_)));
    }

    #[test]
    fn test_merge_keeps_arrival_order() {
        let a = ChatMessage::user("a");
        let b = ChatMessage::user("b");
        let merged = ChatMessage::merged(Some(ChatMessage::merged(None, a)), b);
        assert_eq!(merged.role, Role::Assistant);
        assert_eq!(merged.text(), "a\nb");
    }

    #[test]
    fn test_prepended() {
        let msg = sample().prepended(Role::Assistant, Content::Text("first".to_string()));
        assert_eq!(msg.texts().next(), Some("first"));
        assert_eq!(msg.contents.len(), 4);
    }
}
