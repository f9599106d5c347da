use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberKind, InlineKeyboardButton, InlineKeyboardMarkup, LinkPreviewOptions, UserId,
};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::templates::RenderedMessage;

/// Outbound message channel. Implementations must tell a recipient that can
/// never be reached (blocked bot, deleted account) apart from a transient failure.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, recipient: i64, message: &RenderedMessage) -> CoreResult<()>;
}

/// Membership lookup in the channel trial users must stay subscribed to.
#[async_trait]
pub trait ChannelMembership: Send + Sync {
    async fn is_member(&self, telegram_id: i64) -> CoreResult<bool>;
}

fn classify(recipient: i64, err: RequestError) -> CoreError {
    match err {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked,
        ) => CoreError::RecipientUnreachable(recipient),
        other => CoreError::transient("telegram", other.to_string()),
    }
}

#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn keyboard(message: &RenderedMessage) -> Option<InlineKeyboardMarkup> {
        let mut buttons: Vec<InlineKeyboardButton> = Vec::new();
        for (text, url) in message.buttons.iter() {
            let text = text.trim();
            let url = url.trim();
            if text.is_empty() || url.is_empty() {
                continue;
            }
            match url::Url::parse(url) {
                Ok(parsed) => buttons.push(InlineKeyboardButton::url(text.to_string(), parsed)),
                Err(e) => warn!("Dropping button '{}' with invalid url {}: {}", text, url, e),
            }
        }

        if buttons.is_empty() {
            return None;
        }
        let rows: Vec<Vec<InlineKeyboardButton>> =
            buttons.chunks(2).map(|chunk| chunk.to_vec()).collect();
        Some(InlineKeyboardMarkup::new(rows))
    }
}

#[async_trait]
impl NotificationGateway for TelegramGateway {
    async fn send(&self, recipient: i64, message: &RenderedMessage) -> CoreResult<()> {
        let mut req = self.bot.send_message(ChatId(recipient), message.text.clone());

        if message.disable_link_preview {
            req = req.link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            });
        }

        if let Some(markup) = Self::keyboard(message) {
            req = req.reply_markup(markup);
        }

        req.await.map_err(|e| classify(recipient, e))?;
        Ok(())
    }
}

/// Left, banned, and restricted users who already left count as gone.
fn in_channel(kind: &ChatMemberKind) -> bool {
    kind.is_present()
}

#[derive(Clone)]
pub struct TelegramMembership {
    bot: Bot,
    channel_id: i64,
}

impl TelegramMembership {
    pub fn new(bot: Bot, channel_id: i64) -> Self {
        Self { bot, channel_id }
    }
}

#[async_trait]
impl ChannelMembership for TelegramMembership {
    async fn is_member(&self, telegram_id: i64) -> CoreResult<bool> {
        let member = self
            .bot
            .get_chat_member(ChatId(self.channel_id), UserId(telegram_id as u64))
            .await
            .map_err(|e| CoreError::transient("telegram", e.to_string()))?;

        let is_member = in_channel(&member.kind);
        if !is_member {
            debug!(
                "User {} is NOT a member of channel {} (status: {:?})",
                telegram_id, self.channel_id, member.kind
            );
        }
        Ok(is_member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::{Banned, Member, Owner, Restricted, UntilDate};

    #[test]
    fn blocked_bot_is_unreachable() {
        let err = classify(7, RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(err, CoreError::RecipientUnreachable(7)));
    }

    #[test]
    fn unknown_api_error_is_transient() {
        let err = classify(7, RequestError::Api(ApiError::Unknown("Bad Gateway".into())));
        assert!(err.is_transient());
    }

    fn restricted(is_member: bool) -> ChatMemberKind {
        ChatMemberKind::Restricted(Restricted {
            until_date: UntilDate::Forever,
            is_member,
            can_send_messages: false,
            can_send_audios: false,
            can_send_documents: false,
            can_send_photos: false,
            can_send_videos: false,
            can_send_video_notes: false,
            can_send_voice_notes: false,
            can_send_other_messages: false,
            can_add_web_page_previews: false,
            can_change_info: false,
            can_invite_users: false,
            can_pin_messages: false,
            can_manage_topics: false,
            can_send_polls: false,
        })
    }

    #[test]
    fn channel_presence_by_member_kind() {
        assert!(in_channel(&ChatMemberKind::Member(Member { until_date: None })));
        assert!(in_channel(&ChatMemberKind::Owner(Owner {
            custom_title: None,
            is_anonymous: false,
        })));
        assert!(in_channel(&restricted(true)));

        assert!(!in_channel(&restricted(false)));
        assert!(!in_channel(&ChatMemberKind::Left));
        assert!(!in_channel(&ChatMemberKind::Banned(Banned {
            until_date: UntilDate::Forever,
        })));
    }

    #[test]
    fn keyboard_chunks_two_per_row_and_skips_bad_urls() {
        let message = RenderedMessage {
            text: "hi".into(),
            buttons: vec![
                ("Renew".into(), "https://example.com/renew".into()),
                ("Help".into(), "https://example.com/help".into()),
                ("Site".into(), "https://example.com".into()),
                ("Broken".into(), "not a url".into()),
            ],
            disable_link_preview: true,
        };
        let markup = TelegramGateway::keyboard(&message).unwrap();
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[1].len(), 1);
    }
}
