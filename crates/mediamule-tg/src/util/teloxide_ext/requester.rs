//! Kept separate, because rust-analyzer is slow on processing requester
//! extensions.

use easy_ext::ext;
use teloxide::prelude::*;
use teloxide::requests::Requester;
use teloxide::types::Message;

/// There is [`RequesterExt`] in [`teloxide::prelude`]. We name this symbol
/// different to avoid collisions.
#[ext(UtilRequesterExt)]
pub(crate) impl<T: Requester> T {
    /// Reply to the message. The reply is sent even if the original message
    /// was deleted in the meantime.
    fn reply_to(&self, msg: &Message, text: impl Into<String>) -> Self::SendMessage {
        self.send_message(msg.chat.id, text)
            .reply_to_message_id(msg.id)
            .allow_sending_without_reply(true)
    }

    fn reply_help<Cmd: teloxide::utils::command::BotCommands>(
        &self,
        msg: &Message,
        footer: &str,
    ) -> Self::SendMessage {
        self.reply_to(msg, format!("{}\n\n{footer}", Cmd::descriptions()))
    }
}
