use async_trait::async_trait;
use std::fmt;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use teloxide::RequestError;

use super::{DeliveryError, Destination};

/// Telegram chat or channel reached through the Bot API.
#[derive(Clone)]
pub struct TelegramDestination {
    name: String,
    bot: Bot,
    recipient: Recipient,
}

impl fmt::Debug for TelegramDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramDestination")
            .field("name", &self.name)
            .field("recipient", &self.recipient)
            .finish_non_exhaustive()
    }
}

impl TelegramDestination {
    pub fn new(name: String, bot_token: &str, chat_id: &str) -> Self {
        Self {
            name,
            bot: Bot::new(bot_token.trim()),
            recipient: parse_recipient(chat_id),
        }
    }
}

/// Numeric ids address chats directly; anything else is a channel username.
pub fn parse_recipient(chat_id: &str) -> Recipient {
    let chat_id = chat_id.trim();
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if chat_id.starts_with('@') => Recipient::ChannelUsername(chat_id.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{chat_id}")),
    }
}

fn classify(err: RequestError) -> DeliveryError {
    match err {
        RequestError::Network(_) | RequestError::RetryAfter(_) => {
            DeliveryError::Transient(err.to_string())
        }
        other => DeliveryError::Permanent(other.to_string()),
    }
}

#[async_trait]
impl Destination for TelegramDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(self.recipient.clone(), message)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_parse() {
        assert_eq!(
            parse_recipient("-1001234"),
            Recipient::Id(ChatId(-1001234))
        );
        assert_eq!(
            parse_recipient("@class_reminders"),
            Recipient::ChannelUsername("@class_reminders".into())
        );
        assert_eq!(
            parse_recipient("class_reminders"),
            Recipient::ChannelUsername("@class_reminders".into())
        );
    }
}
