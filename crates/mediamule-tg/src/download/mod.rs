//! Media downloads from the social platforms via the external downloaders.
//!
//! yt-dlp handles videos, audio and playlists, gallery-dl handles photo
//! posts and serves as the fallback for everything yt-dlp can't fetch.

mod gallery;
mod link;
mod mode;
mod ytdlp;

use crate::pipeline::{
    Artifact, AttemptOutcome, Candidate, Category, ConcurrencyLimiter, DeliveryMode, IntakeLimits,
    Job, JobParams, MediaKind, ProgressReporter, Strategy, WorkUnit,
};
use crate::prelude::*;
use crate::util::process::{self, ProcessError};
use crate::util::retry::{bounded_backoff, retry_with_policy};
use crate::{err, Error, ErrorKind, Result};
use gallery::GalleryDlCandidate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use ytdlp::{YtDlpCandidate, YtDlpFormat};

pub(crate) use link::*;
pub(crate) use mode::*;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) ytdlp_bin: String,
    pub(crate) gallery_dl_bin: String,

    /// Upper bound of a single download attempt
    pub(crate) attempt_timeout_secs: u64,

    pub(crate) resolve_timeout_secs: u64,
    pub(crate) resolve_attempts: u32,

    /// Max number of downloads running at the same time
    pub(crate) concurrency: usize,

    /// Max number of entries taken from a playlist or a gallery
    pub(crate) max_entries: usize,

    /// Max number of links in a single batch request
    pub(crate) max_batch: usize,

    /// Max length of a link, a search query or a meme caption
    pub(crate) max_descriptor_chars: usize,
}

impl Config {
    pub(crate) fn intake_limits(&self) -> IntakeLimits {
        IntakeLimits {
            unit_name: "link",
            max_units: self.max_batch,
            max_descriptor_chars: self.max_descriptor_chars,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ytdlp_bin: ytdlp::YT_DLP.to_owned(),
            gallery_dl_bin: gallery::GALLERY_DL.to_owned(),
            attempt_timeout_secs: 300,
            resolve_timeout_secs: 30,
            resolve_attempts: 3,
            concurrency: 2,
            max_entries: 5,
            max_batch: 5,
            max_descriptor_chars: 2048,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum DownloadError {
    #[error("Unsupported URL for `{tool}`: {url}")]
    UnsupportedUrl {
        tool: &'static str,
        url: String,
        source: Error,
    },

    #[error("Resolving `{url}` took longer than {timeout:.0?}")]
    ResolveTimeout { url: String, timeout: Duration },
}

/// Kinds of the downloaded files that are worth delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaFilter {
    Images,

    /// Images, videos and audio
    Any,
}

impl MediaFilter {
    fn accepts(self, kind: MediaKind) -> bool {
        match self {
            Self::Images => kind == MediaKind::Image,
            Self::Any => matches!(kind, MediaKind::Image | MediaKind::Video | MediaKind::Audio),
        }
    }
}

/// Takes the ownership of a file produced by a downloader. Files of the
/// wrong kind and files under the size floor are removed right away.
pub(crate) async fn adopt_output(
    path: PathBuf,
    filter: MediaFilter,
    min_size: u64,
    source: &'static str,
) -> Result<Option<Artifact>> {
    if !tokio::fs::try_exists(&path).await? {
        warn!(
            path = %path.display(),
            source,
            "Declared output file doesn't exist, skipping it"
        );
        return Ok(None);
    }

    let kind = MediaKind::from_path(&path);
    let artifact = Artifact::adopt(path, kind, source).await?;

    if !filter.accepts(kind) {
        debug!(?artifact, "Discarding a file of unwanted kind");
        artifact.discard();
        return Ok(None);
    }

    if artifact.size() < min_size {
        info!(?artifact, min_size, "Discarding an undersized download");
        artifact.discard();
        return Ok(None);
    }

    Ok(Some(artifact))
}

fn is_unsupported_url(err: &Error) -> bool {
    match err.kind() {
        ErrorKind::Process {
            source: ProcessError::Status { stderr, .. },
        } => {
            let stderr = stderr.to_lowercase();
            stderr.contains("unsupported url") || stderr.contains("no suitable extractor")
        }
        _ => false,
    }
}

/// Failures that won't go away by trying the same tool again
fn is_permanent(err: &Error) -> bool {
    is_unsupported_url(err)
        || matches!(
            err.kind(),
            ErrorKind::Process {
                source: ProcessError::Spawn { .. }
            } | ErrorKind::Io { .. }
                | ErrorKind::Fatal { .. }
        )
}

pub(crate) fn into_outcome(
    tool: &'static str,
    unit: &WorkUnit,
    result: Result<Vec<Artifact>>,
) -> AttemptOutcome {
    let err = match result {
        Ok(artifacts) => return AttemptOutcome::Success(artifacts),
        Err(err) => err,
    };

    if is_unsupported_url(&err) {
        return AttemptOutcome::Fatal(err!(DownloadError::UnsupportedUrl {
            tool,
            url: unit.descriptor.clone(),
            source: err,
        }));
    }

    if is_permanent(&err) {
        AttemptOutcome::Fatal(err)
    } else {
        AttemptOutcome::Retryable(err)
    }
}

#[derive(Deserialize)]
struct ResolvedInfo {
    webpage_url: Option<Url>,
}

pub(crate) struct Downloader {
    config: Config,
    limiter: ConcurrencyLimiter,
    min_output_bytes: u64,
}

impl Downloader {
    pub(crate) fn new(config: Config, min_output_bytes: u64) -> Self {
        Self {
            limiter: ConcurrencyLimiter::new("downloader", config.concurrency),
            config,
            min_output_bytes,
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    fn ytdlp(&self, format: YtDlpFormat, mode: &DownloadMode) -> Arc<dyn Candidate> {
        Arc::new(self.ytdlp_candidate(format, mode))
    }

    /// Only playlists are capped, a single link is always taken whole
    fn ytdlp_candidate(&self, format: YtDlpFormat, mode: &DownloadMode) -> YtDlpCandidate {
        let playlist_end = (*mode == DownloadMode::Playlist).then_some(self.config.max_entries);

        YtDlpCandidate {
            bin: self.config.ytdlp_bin.clone(),
            format,
            playlist_end,
            timeout: Duration::from_secs(self.config.attempt_timeout_secs),
            min_size: self.min_output_bytes,
        }
    }

    fn gallery(&self, filter: MediaFilter) -> Arc<dyn Candidate> {
        Arc::new(GalleryDlCandidate {
            bin: self.config.gallery_dl_bin.clone(),
            filter,
            max_entries: self.config.max_entries,
            timeout: Duration::from_secs(self.config.attempt_timeout_secs),
            min_size: self.min_output_bytes,
        })
    }

    /// Audio is fetched by yt-dlp only. Photo posts prefer gallery-dl, the
    /// rest prefers yt-dlp with gallery-dl as the fallback.
    pub(crate) fn strategies(&self, mode: &DownloadMode) -> HashMap<Category, Strategy> {
        let strategy = |candidates| Strategy::new(self.limiter.clone(), candidates);

        let (media, photo_post) = if mode.is_audio() {
            (
                vec![self.ytdlp(YtDlpFormat::Audio, mode)],
                vec![self.ytdlp(YtDlpFormat::Audio, mode)],
            )
        } else {
            (
                vec![
                    self.ytdlp(YtDlpFormat::Video, mode),
                    self.gallery(MediaFilter::Any),
                ],
                vec![
                    self.gallery(MediaFilter::Images),
                    self.ytdlp(YtDlpFormat::Video, mode),
                ],
            )
        };

        HashMap::from([
            (Category::Media, strategy(media)),
            (Category::PhotoPost, strategy(photo_post)),
        ])
    }

    /// Expands short links to the canonical page URLs. Falls back to the
    /// original URL if the downloader can't resolve it.
    #[instrument(skip_all, fields(url = %url))]
    pub(crate) async fn resolve_url(&self, url: Url) -> Url {
        let policy = bounded_backoff(self.config.resolve_attempts);
        let timeout = Duration::from_secs(self.config.resolve_timeout_secs);
        let bin = self.config.ytdlp_bin.as_str();
        let args = [
            "--flat-playlist",
            "--dump-single-json",
            "--no-warnings",
            "--",
            url.as_str(),
        ];
        let args = &args;
        let original = url.as_str();

        let result = retry_with_policy(
            &policy,
            || async move {
                let output = tokio::time::timeout(timeout, process::run_utf8(bin, args))
                    .await
                    .map_err(|_| {
                        err!(DownloadError::ResolveTimeout {
                            url: original,
                            timeout,
                        })
                    })??;

                let info: ResolvedInfo = serde_json::from_str(&output)
                    .fatal_ctx(|| "yt-dlp printed invalid JSON for the resolved URL")?;

                Ok::<_, Error>(info.webpage_url)
            },
            |err| !is_permanent(err),
        )
        .await;

        match result {
            Ok(Some(resolved)) => {
                if resolved != url {
                    debug!(%resolved, "Resolved the URL");
                }
                resolved
            }
            Ok(None) => url,
            Err(err) => {
                warn!(
                    err = tracing_err(&err),
                    "Failed to resolve the URL, using it as is"
                );
                url
            }
        }
    }

    async fn resolve_target(&self, target: Target) -> Target {
        match target {
            Target::Url(url) => Target::Url(self.resolve_url(url).await),
            Target::Search(_) => target,
        }
    }

    /// Resolves the links of the request and creates the job.
    pub(crate) async fn plan_job(
        &self,
        request: DownloadRequest,
        progress: ProgressReporter,
        work_root: &Path,
    ) -> Result<Job> {
        let targets = futures::future::join_all(
            request
                .targets
                .into_iter()
                .map(|target| self.resolve_target(target)),
        )
        .await;

        self.build_job(request.mode, targets, progress, work_root)
    }

    fn build_job(
        &self,
        mode: DownloadMode,
        targets: Vec<Target>,
        progress: ProgressReporter,
        work_root: &Path,
    ) -> Result<Job> {
        let units: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let category = match target {
                    Target::Url(url) if is_photo_post(url) => Category::PhotoPost,
                    Target::Url(_) | Target::Search(_) => Category::Media,
                };
                WorkUnit::new(i + 1, target.descriptor(), category)
            })
            .collect();

        if units
            .iter()
            .any(|unit| unit.category == Category::PhotoPost)
        {
            progress.report("TikTok photo detected – gallery mode! 📸");
        }

        Job::new(
            JobParams {
                units,
                strategies: self.strategies(&mode),
                transform: mode.transform(),
                delivery: DeliveryMode::PerUnit,
                texts: Box::new(DownloadTexts { mode }),
                progress,
            },
            work_root,
        )
    }

    /// Logs the versions of the external downloaders, so that a missing
    /// tool is noticed at startup rather than on the first request.
    pub(crate) async fn check_tools(&self) {
        for bin in [&self.config.ytdlp_bin, &self.config.gallery_dl_bin] {
            match process::run_utf8(bin, &["--version"]).await {
                Ok(version) => info!(bin, version = version.trim(), "Found the downloader"),
                Err(err) => warn!(
                    err = tracing_err(&err),
                    bin, "The downloader is not available, downloads will fail"
                ),
            }
        }
    }
}
