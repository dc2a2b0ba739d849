//! Wire Frames - JSON Protocol of the Streaming Hub
//!
//! Frame definitions for the WebSocket hub at `{base}/stream`. Each frame is
//! one JSON text message, tagged by a lowercase `type` field with camelCase
//! payload keys:
//!
//! ```text
//! client -> server   subscribe { subscriptionId, chatId,
//!                                lastMessageId?, lastFragmentId? }
//!                    unsubscribe { subscriptionId }
//! server -> client   fragment { subscriptionId, id, sender, text,
//!                               fragmentId, isFinal? }
//!                    complete { subscriptionId }
//! ```
//!
//! A resume cursor's `None` halves are omitted from the subscribe frame
//! rather than sent as nulls, so a fresh subscription carries only the chat
//! id. Fragment payloads embed a [`FragmentRecord`] flattened into the frame
//! object.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::traits::FragmentRecord;
use crate::messages::{ChatId, FragmentId, MessageId, ResumeCursor};

/// Frames the client sends to the hub
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Open a push subscription for one chat, resuming past the cursor
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Client-generated id correlating all frames of this subscription
        subscription_id: Uuid,
        /// Chat whose reply fragments should be pushed
        chat_id: ChatId,
        /// Last fully received message, if resuming
        #[serde(skip_serializing_if = "Option::is_none")]
        last_message_id: Option<MessageId>,
        /// Last received fragment, if resuming mid-message
        #[serde(skip_serializing_if = "Option::is_none")]
        last_fragment_id: Option<FragmentId>,
    },
    /// Tear down one subscription
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// Id from the corresponding subscribe frame
        subscription_id: Uuid,
    },
}

impl ClientFrame {
    /// Build a subscribe frame from a resume cursor
    #[must_use]
    pub fn subscribe(subscription_id: Uuid, chat: &ChatId, cursor: &ResumeCursor) -> Self {
        ClientFrame::Subscribe {
            subscription_id,
            chat_id: chat.clone(),
            last_message_id: cursor.last_message_id.clone(),
            last_fragment_id: cursor.last_fragment_id.clone(),
        }
    }
}

/// Frames the hub pushes to the client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// One reply fragment for a subscription
    #[serde(rename_all = "camelCase")]
    Fragment {
        /// Subscription this fragment belongs to
        subscription_id: Uuid,
        /// The fragment payload, flattened into the frame object
        #[serde(flatten)]
        record: FragmentRecord,
    },
    /// The server finished the subscription's current reply
    #[serde(rename_all = "camelCase")]
    Complete {
        /// Subscription that completed
        subscription_id: Uuid,
    },
}

impl ServerFrame {
    /// Subscription id carried by any server frame
    #[must_use]
    pub fn subscription_id(&self) -> Uuid {
        match self {
            ServerFrame::Fragment {
                subscription_id, ..
            }
            | ServerFrame::Complete { subscription_id } => *subscription_id,
        }
    }
}
