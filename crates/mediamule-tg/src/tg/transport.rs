//! Telegram implementations of the status and media surfaces of a job

use crate::pipeline::{MediaSink, OutgoingMedia, SendMethod, StatusSink, TransportError};
use crate::prelude::*;
use crate::{tg, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use teloxide::RequestError;

/// Telegram refuses texts longer than this
pub(crate) const MAX_TEXT_CHARS: usize = 4096;

/// Single status message of the job. The first status is sent as a reply to
/// the request, all subsequent ones edit that message.
pub(crate) struct ChatStatus {
    bot: tg::Bot,
    request: Message,
    message: Mutex<Option<MessageId>>,
}

impl ChatStatus {
    pub(crate) fn new(bot: tg::Bot, request: Message) -> Self {
        Self {
            bot,
            request,
            message: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StatusSink for ChatStatus {
    async fn show(&self, text: &str) -> Result {
        let text = text.truncate_chars(MAX_TEXT_CHARS);

        let message = *self.message.lock();

        match message {
            Some(id) => {
                self.bot
                    .edit_message_text(self.request.chat.id, id, text)
                    .await?;
            }
            None => {
                let sent = self.bot.reply_to(&self.request, text).await?;
                *self.message.lock() = Some(sent.id);
            }
        }

        Ok(())
    }
}

pub(crate) struct ChatMediaSink {
    bot: tg::Bot,
    chat_id: ChatId,
}

impl ChatMediaSink {
    pub(crate) fn new(bot: tg::Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl MediaSink for ChatMediaSink {
    async fn send(&self, media: OutgoingMedia<'_>) -> Result<(), TransportError> {
        let chat_id = self.chat_id;
        let file = InputFile::file(media.path.to_path_buf());
        let caption = media.caption.unwrap_or_default().to_owned();

        let bot = &self.bot;

        #[rustfmt::skip]
        let result = match media.method {
            SendMethod::Photo    => bot.send_photo(chat_id, file).caption(caption).await,
            SendMethod::Video    => bot.send_video(chat_id, file).caption(caption).await,
            SendMethod::Audio    => bot.send_audio(chat_id, file).caption(caption).await,
            SendMethod::Voice    => bot.send_voice(chat_id, file).caption(caption).await,
            SendMethod::Document => bot.send_document(chat_id, file).caption(caption).await,
            // Stickers can't have captions
            SendMethod::Sticker  => bot.send_sticker(chat_id, file).await,
        };

        result.map(drop).map_err(into_transport_error)
    }
}

fn into_transport_error(err: RequestError) -> TransportError {
    match err {
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_) => {
            TransportError::Network {
                source: Box::new(err),
            }
        }
        _ => TransportError::Rejected {
            source: Box::new(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::ApiError;

    #[test]
    fn transport_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = RequestError::Io(io.into());
        assert!(into_transport_error(err).is_network());

        let err = RequestError::Api(ApiError::BotBlocked);
        assert!(!into_transport_error(err).is_network());
    }
}
