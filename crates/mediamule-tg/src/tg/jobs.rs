use super::transport::{ChatMediaSink, ChatStatus};
use crate::download::DownloadCommand;
use crate::pipeline::{Job, ProgressReporter};
use crate::prelude::*;
use crate::{clay, tg, Result};
use teloxide::types::Message;

impl tg::Ctx {
    fn progress(&self, msg: &Message) -> ProgressReporter {
        ProgressReporter::new(ChatStatus::new(self.bot.clone(), msg.clone()))
    }

    async fn run_job(&self, msg: &Message, job: Job) {
        let sink = ChatMediaSink::new(self.bot.clone(), msg.chat.id);
        self.runner.run(job, &sink).await;
    }

    /// Validates the arguments of the command before anything is shown in
    /// the chat, then downloads and delivers the media.
    pub(crate) async fn download(
        &self,
        msg: &Message,
        command: DownloadCommand,
        args: &str,
    ) -> Result {
        let request = command.parse(args, self.downloader.config())?;

        info!(targets = request.targets.len(), mode = ?request.mode, "Starting download");

        let progress = self.progress(msg);
        progress.report(request.announcement());

        let job = self
            .downloader
            .plan_job(request, progress, &self.runner.config().work_root)
            .await?;

        self.run_job(msg, job).await;

        Ok(())
    }

    pub(crate) async fn clay(&self, msg: &Message, script: &str) -> Result {
        let strategy = self
            .hf
            .scene_strategy(clay::PROMPTS, self.runner.config().min_output_bytes);

        let progress = self.progress(msg);

        let job = clay::plan_job(
            script,
            strategy,
            progress.clone(),
            &self.runner.config().work_root,
        )?;

        progress.report(clay::STARTED);

        self.run_job(msg, job).await;

        Ok(())
    }
}
