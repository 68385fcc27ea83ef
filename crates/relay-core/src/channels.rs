//! Channel port: the few client-library calls the copy loop needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::{
    domain::{ChannelInfo, ChannelRef, ChatId, MessageId},
    Result,
};

/// Media attached to a message, named the way `/skip` accepts them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, VariantNames, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
    Sticker,
    VideoNote,
    Poll,
    Contact,
    Location,
    Other,
}

/// What the relay can see of a single message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub id: i32,
    /// Text, or the caption for media messages.
    pub text: Option<String>,
    pub media: Option<MediaKind>,
}

impl MessageSnapshot {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_none() && self.text.as_deref().map(str::trim).unwrap_or("").is_empty()
    }

    /// True when the message carries a media kind listed in `skip`.
    pub fn is_skipped_by(&self, skip: &[MediaKind]) -> bool {
        self.media.map(|m| skip.contains(&m)).unwrap_or(false)
    }
}

#[async_trait]
pub trait ChannelPort: Send + Sync {
    async fn resolve(&self, channel: &ChannelRef) -> Result<ChannelInfo>;

    /// Re-send `id` from `source` into `destination` as a new message.
    ///
    /// Returns `Ok(None)` when the source id does not exist (deleted or unused).
    async fn copy_message(
        &self,
        source: ChatId,
        id: MessageId,
        destination: ChatId,
    ) -> Result<Option<MessageId>>;

    /// Read a message's text and media kind; `Ok(None)` when it does not exist.
    async fn fetch_message(&self, chat: ChatId, id: MessageId) -> Result<Option<MessageSnapshot>>;
}
