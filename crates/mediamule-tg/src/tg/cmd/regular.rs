use super::Command;
use crate::download::DownloadCommand;
use crate::prelude::*;
use crate::tg::transport::MAX_TEXT_CHARS;
use crate::{tg, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

const HELP_FOOTER: &str = "\
Kirim link biasa auto detect platform! Progress on! 🚀

Kirim JSON buat clay animation (max 2 scene, text max 15 karakter, duration default 3 detik):
{\"scenes\": [{\"text\": \"cat\", \"duration\": 3}]}

📌 Bot akan coba video dulu, jika gagal pakai image slideshow";

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Commands:")]
pub(crate) enum Cmd {
    #[command(description = "show the guide")]
    Help,

    #[command(description = "find working models")]
    Findmodels,

    #[command(description = "<link> - Download TikTok video/foto 📱")]
    Tiktok(String),

    #[command(description = "<link> - Instagram post/reel/carousel 📸")]
    Ig(String),

    #[command(description = "<link> - YouTube video/playlist 🎥")]
    Yt(String),

    #[command(description = "<link> - Twitter/X video/thread 🐦")]
    X(String),

    #[command(description = "<link> - Facebook video/post 📱")]
    Fb(String),

    #[command(description = "<link> - Reddit post/video 🐻")]
    Reddit(String),

    #[command(description = "<link> - Convert ke sticker 🔥")]
    Sticker(String),

    #[command(description = "<link> - Kompres video 💨")]
    Compress(String),

    #[command(description = "<query> - Cari lagu YouTube 🎵")]
    Music(String),

    #[command(description = "<link> - Playlist (max 5) 📂")]
    Playlist(String),

    #[command(description = "<link> - Slow motion 🐌")]
    Slowmo(String),

    #[command(description = "<top> | <bottom> <link> - Bikin meme 😂")]
    Meme(String),

    #[command(description = "<link> - Voice note extract 🔊")]
    Voice(String),

    #[command(description = "<link1> <link2> ... (max 5)")]
    Batch(String),
}

impl Cmd {
    fn into_download(self) -> Option<(DownloadCommand, String)> {
        let (command, args) = match self {
            Cmd::Help | Cmd::Findmodels => return None,
            Cmd::Tiktok(args) => (DownloadCommand::Tiktok, args),
            Cmd::Ig(args) => (DownloadCommand::Ig, args),
            Cmd::Yt(args) => (DownloadCommand::Yt, args),
            Cmd::X(args) => (DownloadCommand::X, args),
            Cmd::Fb(args) => (DownloadCommand::Fb, args),
            Cmd::Reddit(args) => (DownloadCommand::Reddit, args),
            Cmd::Sticker(args) => (DownloadCommand::Sticker, args),
            Cmd::Compress(args) => (DownloadCommand::Compress, args),
            Cmd::Music(args) => (DownloadCommand::Music, args),
            Cmd::Playlist(args) => (DownloadCommand::Playlist, args),
            Cmd::Slowmo(args) => (DownloadCommand::Slowmo, args),
            Cmd::Meme(args) => (DownloadCommand::Meme, args),
            Cmd::Voice(args) => (DownloadCommand::Voice, args),
            Cmd::Batch(args) => (DownloadCommand::Batch, args),
        };
        Some((command, args))
    }
}

#[async_trait]
impl Command for Cmd {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        match self {
            Cmd::Help => {
                ctx.bot.reply_help::<Cmd>(msg, HELP_FOOTER).await?;
            }
            Cmd::Findmodels => {
                ctx.bot
                    .reply_to(msg, "🔍 Searching for working models...")
                    .await?;

                let report = ctx.hf.probe_models().await.to_string();

                ctx.bot
                    .reply_to(msg, report.truncate_chars(MAX_TEXT_CHARS))
                    .await?;
            }
            cmd => {
                let (command, args) = cmd
                    .into_download()
                    .fatal_ctx(|| "BUG: all other commands are downloads")?;

                ctx.download(msg, command, &args).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_parsed() {
        let parse = |text: &str| Cmd::parse(text, "mediamule_bot").unwrap();

        let cmd = parse("/tiktok https://www.tiktok.com/@user/video/1");
        assert_eq!(
            cmd.into_download(),
            Some((
                DownloadCommand::Tiktok,
                "https://www.tiktok.com/@user/video/1".to_owned()
            ))
        );

        let cmd = parse("/meme top | bottom https://x.com/a/status/1");
        assert_eq!(
            cmd.into_download(),
            Some((
                DownloadCommand::Meme,
                "top | bottom https://x.com/a/status/1".to_owned()
            ))
        );

        assert_eq!(parse("/findmodels").into_download(), None);
    }

    #[test]
    fn every_download_command_is_listed_in_help() {
        let help = Cmd::descriptions().to_string();
        for command in [
            "/tiktok", "/ig", "/yt", "/x", "/fb", "/reddit", "/sticker", "/compress", "/music",
            "/playlist", "/slowmo", "/meme", "/voice", "/batch", "/findmodels",
        ] {
            assert!(help.contains(command), "{command} is missing in:\n{help}");
        }
    }
}
