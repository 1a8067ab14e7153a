//! Document schemas for Caseline collections

pub mod bookmark;
pub mod conversation;
pub mod message;
pub mod metadata;
pub mod notification;
pub mod use_case;
pub mod view_event;

pub use bookmark::{BookmarkDoc, BOOKMARK_COLLECTION};
pub use conversation::{
    ConversationDoc, ConversationKind, CONVERSATION_COLLECTION, MAX_GROUP_MEMBERS,
};
pub use message::{MessageDoc, MESSAGE_COLLECTION};
pub use metadata::Metadata;
pub use notification::{NotificationDoc, NotificationKind, NOTIFICATION_COLLECTION};
pub use use_case::{GeoPoint, UseCaseDoc, USE_CASE_COLLECTION};
pub use view_event::{ViewEventDoc, VIEW_EVENT_COLLECTION};
