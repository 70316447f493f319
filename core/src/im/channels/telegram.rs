//! Telegram chat network: all teloxide usage is confined here. Exposes the transport (send one
//! line) and the receiver (mark chat joined, push incoming lines to the inbound queue).

use std::borrow::Cow;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::RequestError;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::im::log::{floor_char_boundary, truncate_content_default};
use crate::im::network::ChatNetworks;
use crate::im::transport::{ImChannelCapabilities, ImTransport, SendError};
use crate::im::worker::InboundMessage;

pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;
pub const TELEGRAM_PREFIX: &str = "telegram";

/// Telegram send implementation: parses channel_id as "telegram:CHAT_ID" and calls send_message.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait::async_trait]
impl ImTransport for TelegramTransport {
    fn capabilities(&self) -> ImChannelCapabilities {
        ImChannelCapabilities {
            max_message_len: TELEGRAM_MAX_MESSAGE_LEN,
            channel_id_prefix: TELEGRAM_PREFIX,
        }
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError> {
        let chat_id = parse_chat_id(channel_id)?;
        let text = truncate_to_max(text).into_owned();

        self.bot
            .send_message(chat_id, text)
            .await
            .map_err(|e| match e {
                RequestError::RetryAfter(secs) => SendError::RateLimited {
                    retry_after_secs: f64::from(secs.seconds()),
                },
                other => SendError::Other(other.to_string()),
            })?;
        Ok(())
    }
}

/// Channel id for a Telegram chat.
pub fn channel_id_for(chat_id: ChatId) -> String {
    format!("{}:{}", TELEGRAM_PREFIX, chat_id.0)
}

fn parse_chat_id(channel_id: &str) -> Result<ChatId, SendError> {
    let s = channel_id
        .strip_prefix("telegram:")
        .ok_or_else(|| SendError::Other("invalid channel_id (expected telegram:CHAT_ID)".into()))?;
    let id: i64 = s
        .parse()
        .map_err(|_| SendError::Other(format!("invalid telegram chat_id: {}", channel_id)))?;
    Ok(ChatId(id))
}

fn truncate_to_max(text: &str) -> Cow<'_, str> {
    if text.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text[..floor_char_boundary(text, TELEGRAM_MAX_MESSAGE_LEN)].to_string())
    }
}

fn format_user(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map(|u| {
            u.username
                .as_ref()
                .map(|s| format!("@{}", s))
                .unwrap_or_else(|| u.first_name.clone())
        })
        .unwrap_or_else(|| "?".to_string())
}

/// Run the Telegram receiver (long polling) until the bot stops (e.g. Ctrl+C).
/// Every chat a text line arrives from is marked joined, then the line goes to `inbound_tx`.
pub async fn run_telegram_receiver(
    bot: Bot,
    networks: Arc<ChatNetworks>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    teloxide::repl(bot, move |msg: Message| {
        let inbound_tx = inbound_tx.clone();
        let networks = Arc::clone(&networks);

        async move {
            let channel_id = channel_id_for(msg.chat.id);
            networks.mark_joined(&channel_id);

            let Some(text) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
                return Ok(());
            };
            info!(
                network = TELEGRAM_PREFIX,
                channel_id = %channel_id,
                from = %format_user(&msg),
                content = %truncate_content_default(text),
                "incoming"
            );

            if inbound_tx
                .send(InboundMessage::new(channel_id, text.to_string()))
                .await
                .is_err()
            {
                warn!("inbound queue closed, dropping line");
            }
            Ok(())
        }
    })
    .await;
}

/// Validate the token with getMe and log the bot identity. Returns the bot ready for
/// `run_telegram_receiver`.
pub async fn connect(token: &str) -> Result<Bot, String> {
    let bot = Bot::new(token);
    let me = bot
        .get_me()
        .await
        .map_err(|e| format!("Telegram API unreachable or token rejected: {}", e))?;
    let name = me.user.username.as_deref().unwrap_or("(no username)");
    info!(network = TELEGRAM_PREFIX, bot = %name, "bot started");
    Ok(bot)
}
