//! Telegram commands root module

mod cmd;
mod jobs;
mod transport;

use crate::download::Downloader;
use crate::hf::HfService;
use crate::media_conv::Ffmpeg;
use crate::pipeline::{self, JobRunner};
use crate::prelude::*;
use crate::{http, Result};
use dptree::di::DependencyMap;
use serde::Deserialize;
use std::sync::Arc;
use teloxide::adaptors::{CacheMe, Throttle, Trace};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

/// Read from the `TG_` environment variables
#[derive(Deserialize, Clone)]
pub(crate) struct Config {
    /// Bot API token issued by BotFather
    pub(crate) token: String,
}

pub(crate) type Bot = Trace<CacheMe<Throttle<teloxide::Bot>>>;

pub(crate) struct Ctx {
    bot: Bot,
    runner: JobRunner,
    hf: HfService,
    downloader: Downloader,
}

pub(crate) async fn run_bot(config: crate::Config) -> Result {
    let crate::Config {
        tg: tg_cfg,
        hf: hf_cfg,
        download: download_cfg,
        pipeline: pipeline_cfg,
        metrics: _,
    } = config;

    let mut di = DependencyMap::new();

    let http = http::create_client();

    let bot: Bot = teloxide::Bot::new(tg_cfg.token)
        .throttle(Default::default())
        .cache_me()
        .trace(teloxide::adaptors::trace::Settings::all());

    pipeline::prepare_work_root(&pipeline_cfg).await?;

    let downloader = Downloader::new(download_cfg, pipeline_cfg.min_output_bytes);
    downloader.check_tools().await;

    let encoder = Ffmpeg::new(pipeline_cfg.min_output_bytes);

    di.insert(Arc::new(Ctx {
        bot: bot.clone(),
        runner: JobRunner::new(Arc::new(encoder), pipeline_cfg),
        hf: HfService::new(http, hf_cfg),
        downloader,
    }));

    info!("Starting bot...");

    bot.set_my_commands(cmd::regular::Cmd::bot_commands())
        .await?;

    let handler = dptree::entry()
        .inspect(|update: Update| {
            metrics::increment_counter!(
                "tg_updates_total",
                "kind" => update.kind.discriminator()
            );
        })
        .branch(
            Update::filter_message()
                .filter_command::<cmd::StartCommand>()
                .endpoint(cmd::handle::<cmd::StartCommand>()),
        )
        .branch(
            Update::filter_message()
                .filter_command::<cmd::regular::Cmd>()
                .endpoint(cmd::handle::<cmd::regular::Cmd>()),
        )
        .branch(
            Update::filter_message()
                .chain(dptree::filter_map(cmd::PlainText::filter))
                .endpoint(cmd::handle::<cmd::PlainText>()),
        )
        .inspect(|update: Update| {
            metrics::increment_counter!(
                "tg_updates_skipped_total",
                "kind" => update.kind.discriminator()
            );
        });

    Dispatcher::builder(bot, handler)
        .dependencies(di)
        // Updates of the same chat are processed concurrently
        .distribution_function(|_| None::<std::convert::Infallible>)
        // We don't handle all possible messages that users send,
        // so to suppress the warning that we don't do this we have
        // a noop default handler here
        .default_handler(|_| std::future::ready(()))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");

    Ok(())
}
