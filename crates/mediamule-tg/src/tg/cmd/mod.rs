pub(crate) mod regular;

use crate::download::DownloadCommand;
use crate::prelude::*;
use crate::util::DynResult;
use crate::{tg, Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use teloxide::macros::BotCommands;
use teloxide::types::{Message, User};

/// Non-user errors are cut to this length in the chat, the full chain is
/// in the logs under the error's id
const MAX_ERROR_CHARS: usize = 1000;

#[async_trait]
pub(crate) trait Command: fmt::Debug + Send + Sync + 'static {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result;
}

pub(crate) fn handle<'a, C: Command>(
) -> impl Fn(Arc<tg::Ctx>, Message, C) -> BoxFuture<'a, DynResult> {
    move |ctx, msg, cmd| {
        let info = info_span!(
            "handle_message",
            sender = msg.from().map(User::debug_id).as_deref(),
            chat = %msg.chat.debug_id(),
            cmd = format_args!("{cmd:?}")
        );

        let fut = async move {
            debug!("Processing command");

            let result = cmd.handle(&ctx, &msg).await;
            if let Err(err) = &result {
                let span = warn_span!("err", err = tracing_err(err), id = err.id());
                async {
                    if !err.is_user_error() {
                        warn!("Command handler returned an error");
                    }

                    let msg_result = ctx.bot.reply_to(&msg, error_reply(err)).await;

                    if let Err(err) = msg_result {
                        warn!(
                            err = tracing_err(&err),
                            "Failed to reply with the error message to the user"
                        );
                    }
                }
                .instrument(span)
                .await;
            }
            result.map_err(Into::into)
        };

        Box::pin(fut.instrument(info))
    }
}

fn error_reply(err: &Error) -> String {
    if err.is_user_error() {
        return format!("❌ {}", err.kind());
    }

    let chain = err.display_chain().to_string();

    format!("❌ Error: {}", chain.truncate_chars(MAX_ERROR_CHARS))
}

/// Special case for the `/start` command that Telegram sends when the user
/// opens the chat with the bot.
///
/// We don't want this command to appear in the help message, so we handle
/// it separately
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case")]
pub(crate) enum StartCommand {
    #[command(description = "unreachable")]
    Start,
}

#[async_trait]
impl Command for StartCommand {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        regular::Cmd::Help.handle(ctx, msg).await
    }
}

/// Text message without a command
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PlainText {
    /// JSON scene script of a claymation
    SceneScript(String),

    /// Link whose platform is detected automatically
    Link(String),
}

impl PlainText {
    pub(crate) fn filter(msg: Message) -> Option<Self> {
        Self::classify(msg.text()?, msg.chat.is_private())
    }

    /// Group chats are full of unrelated talk, so only the texts that look
    /// like a script or a link are taken there.
    fn classify(text: &str, private_chat: bool) -> Option<Self> {
        let text = text.trim();

        if text.is_empty() || text.starts_with('/') {
            return None;
        }

        if text.starts_with('{') {
            return Some(Self::SceneScript(text.to_owned()));
        }

        if !private_chat && !text.starts_with("http") {
            return None;
        }

        Some(Self::Link(text.to_owned()))
    }
}

#[async_trait]
impl Command for PlainText {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        match self {
            Self::SceneScript(script) => ctx.clay(msg, &script).await,
            Self::Link(link) => ctx.download(msg, DownloadCommand::Link, &link).await,
        }
    }
}
