//! Chat Data Model
//!
//! Core types shared by every layer: conversations, finalized messages,
//! the incremental fragments a streaming reply is delivered as, and the
//! resumption cursor that lets a dropped subscription pick up where it
//! left off.
//!
//! # Fragments and messages
//!
//! A streaming assistant reply arrives as a series of [`MessageFragment`]s
//! sharing one message id. Fragment order is the delivery order; the
//! fragment flagged `is_final` completes the message. The pair
//! `(last_message_id, last_fragment_id)` in [`ResumeCursor`] is everything
//! a backend needs to resume a subscription without re-sending completed
//! messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

/// Opaque identifier of a message within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Opaque identifier of a single fragment within a streaming message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// View the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(ChatId);
string_id!(MessageId);
string_id!(FragmentId);

/// Who produced a message or fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The human side of the conversation.
    User,
    /// The assistant side of the conversation.
    Assistant,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Assistant => write!(f, "assistant"),
        }
    }
}

/// A conversation as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Unique within a client session.
    pub id: ChatId,
    /// Display name chosen at creation time.
    pub name: String,
}

impl Chat {
    /// Create a chat handle.
    #[must_use]
    pub fn new(id: impl Into<ChatId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A finalized message owned by exactly one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Originating side.
    pub sender: Sender,
    /// Full message text; append-only once finalized.
    pub text: String,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(id: impl Into<MessageId>, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender,
            text: text.into(),
        }
    }
}

/// One incremental piece of an in-progress message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFragment {
    /// The message this fragment belongs to.
    pub id: MessageId,
    /// Originating side (assistant for streamed replies).
    pub sender: Sender,
    /// Incremental text delta.
    pub text: String,
    /// Per-fragment identifier, increasing in delivery order.
    pub fragment_id: FragmentId,
    /// True on the fragment that completes the message.
    #[serde(default)]
    pub is_final: bool,
}

/// Resumption state for a per-conversation subscription.
///
/// `last_message_id` names the most recently *completed* message;
/// `last_fragment_id` names the most recently *received* fragment of the
/// in-progress message. Passed back to the backend when re-subscribing so
/// already-seen fragments are not re-delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeCursor {
    /// Most recently completed message, if any.
    pub last_message_id: Option<MessageId>,
    /// Most recent fragment of the in-progress message, if any.
    pub last_fragment_id: Option<FragmentId>,
}

impl ResumeCursor {
    /// Fold one received fragment into the cursor.
    ///
    /// `last_fragment_id` always takes the fragment's id; `last_message_id`
    /// advances only when the fragment is final. The next message's first
    /// fragment overwrites `last_fragment_id`, which is all the "reset" a
    /// new message needs. Re-observing a duplicate fragment near a resume
    /// boundary leaves the cursor unchanged.
    pub fn observe(&mut self, fragment: &MessageFragment) {
        self.last_fragment_id = Some(fragment.fragment_id.clone());
        if fragment.is_final {
            self.last_message_id = Some(fragment.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fragment(message: &str, fragment: &str, is_final: bool) -> MessageFragment {
        MessageFragment {
            id: message.into(),
            sender: Sender::Assistant,
            text: "chunk ".to_string(),
            fragment_id: fragment.into(),
            is_final,
        }
    }

    #[test]
    fn test_cursor_advances_message_only_on_final_fragment() {
        let mut cursor = ResumeCursor::default();

        cursor.observe(&fragment("m1", "m1-0", false));
        assert_eq!(cursor.last_message_id, None);
        assert_eq!(cursor.last_fragment_id, Some("m1-0".into()));

        cursor.observe(&fragment("m1", "m1-1", false));
        assert_eq!(cursor.last_message_id, None);
        assert_eq!(cursor.last_fragment_id, Some("m1-1".into()));

        cursor.observe(&fragment("m1", "m1-2", true));
        assert_eq!(cursor.last_message_id, Some("m1".into()));
        assert_eq!(cursor.last_fragment_id, Some("m1-2".into()));
    }

    #[test]
    fn test_cursor_tracks_latest_fragment_across_messages() {
        let mut cursor = ResumeCursor::default();

        cursor.observe(&fragment("m1", "m1-0", true));
        cursor.observe(&fragment("m2", "m2-0", false));

        // A new message's first fragment overwrites the fragment cursor
        // while the completed-message cursor stays on m1.
        assert_eq!(cursor.last_message_id, Some("m1".into()));
        assert_eq!(cursor.last_fragment_id, Some("m2-0".into()));
    }

    #[test]
    fn test_cursor_is_stable_for_redelivered_fragment() {
        let mut cursor = ResumeCursor::default();
        let dup = fragment("m1", "m1-3", false);

        cursor.observe(&dup);
        let snapshot = cursor.clone();
        cursor.observe(&dup);

        assert_eq!(cursor, snapshot);
    }

    #[test]
    fn test_sender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Sender::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Sender::Assistant).unwrap(),
            "\"assistant\""
        );
        let parsed: Sender = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(parsed, Sender::Assistant);
    }

    #[test]
    fn test_fragment_uses_camel_case_keys() {
        let frag = fragment("m9", "m9-4", true);
        let json = serde_json::to_value(&frag).unwrap();

        assert_eq!(json["id"], "m9");
        assert_eq!(json["fragmentId"], "m9-4");
        assert_eq!(json["isFinal"], true);
        assert!(json.get("fragment_id").is_none());
    }

    #[test]
    fn test_fragment_is_final_defaults_to_false() {
        let json = r#"{"id":"m1","sender":"assistant","text":"hi ","fragmentId":"m1-0"}"#;
        let frag: MessageFragment = serde_json::from_str(json).unwrap();
        assert!(!frag.is_final);
    }

    #[test]
    fn test_id_display_and_from() {
        let id = ChatId::from("42");
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_str(), "42");
        assert_eq!(MessageId::from("m".to_string()).as_str(), "m");
    }
}
