use super::{Artifact, Config, JobTexts, MediaKind, WorkUnit};
use crate::media_conv::{EncodeRequest, Encoder, Template};
use crate::prelude::*;
use crate::util::display::human_size;
use crate::util::retry::{bounded_backoff, retry_with_policy};
use crate::util::DynError;
use crate::{err, Error, Result};
use async_trait::async_trait;
use itertools::Itertools;
use std::path::Path;
use tempfile::TempPath;

/// Transport method of a file in the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum SendMethod {
    Photo,
    Video,
    Audio,
    Voice,
    Sticker,
    Document,
}

/// Size thresholds above which the media is sent as a generic document
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendLimits {
    pub(crate) max_inline_photo: u64,
    pub(crate) max_inline_media: u64,
}

impl SendLimits {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            max_inline_photo: config.inline_photo_max_bytes,
            max_inline_media: config.inline_media_max_bytes,
        }
    }
}

impl SendMethod {
    pub(crate) fn select(kind: MediaKind, size: u64, limits: SendLimits) -> Self {
        match kind {
            MediaKind::Image if size <= limits.max_inline_photo => Self::Photo,
            MediaKind::Video if size <= limits.max_inline_media => Self::Video,
            MediaKind::Audio if size <= limits.max_inline_media => Self::Audio,
            MediaKind::Voice if size <= limits.max_inline_media => Self::Voice,
            MediaKind::Sticker if size <= limits.max_inline_photo => Self::Sticker,
            _ => Self::Document,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OutgoingMedia<'a> {
    pub(crate) path: &'a Path,
    pub(crate) method: SendMethod,
    pub(crate) caption: Option<&'a str>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
    #[error("Network failure while sending the file")]
    Network { source: Box<DynError> },

    #[error("The chat transport refused the file")]
    Rejected { source: Box<DynError> },
}

impl TransportError {
    pub(crate) fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Destination of the produced media, e.g. the chat of the requester
#[async_trait]
pub(crate) trait MediaSink: Send + Sync {
    async fn send(&self, media: OutgoingMedia<'_>) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum DeliveryError {
    #[error("Failed to send the {method} after {attempts} attempt(s)")]
    Send {
        method: SendMethod,
        attempts: u32,
        source: TransportError,
    },

    #[error("Failed to join {clips} clip(s) into a single video")]
    Concat { clips: usize, source: Error },
}

/// Sends the media, retrying network failures with a bounded backoff.
/// Other failures are returned right away.
pub(crate) async fn send_with_retry(
    sink: &dyn MediaSink,
    media: OutgoingMedia<'_>,
    max_attempts: u32,
) -> Result {
    let policy = bounded_backoff(max_attempts);
    let mut attempts: u32 = 0;

    let result = retry_with_policy(
        &policy,
        || {
            attempts += 1;
            sink.send(media)
        },
        TransportError::is_network,
    )
    .await;

    match result {
        Ok(()) => {
            metrics::increment_counter!("delivered_files_total", "method" => <&'static str>::from(media.method));
            Ok(())
        }
        Err(source) => Err(err!(DeliveryError::Send {
            method: media.method,
            attempts,
            source,
        })),
    }
}

/// Joins the artifacts in the given order into a single video with the
/// encoder's concat facility and sends it.
pub(crate) async fn deliver_concat(
    artifacts: &[&Artifact],
    texts: &dyn JobTexts,
    encoder: &dyn Encoder,
    sink: &dyn MediaSink,
    workdir: &Path,
    config: &Config,
) -> Result {
    let clips = artifacts.len();

    let joined = join_clips(artifacts, encoder, workdir)
        .await
        .map_err(|source| err!(DeliveryError::Concat { clips, source }))?;

    let size = tokio::fs::metadata(&*joined).await?.len();

    debug!(size = %human_size(size), clips, "Joined the clips");

    let caption = texts.concat_caption();
    let media = OutgoingMedia {
        path: &joined,
        method: SendMethod::select(MediaKind::Video, size, SendLimits::from_config(config)),
        caption: caption.as_deref(),
    };

    send_with_retry(sink, media, config.send_attempts).await
}

async fn join_clips(
    artifacts: &[&Artifact],
    encoder: &dyn Encoder,
    workdir: &Path,
) -> Result<TempPath> {
    let manifest = artifacts
        .iter()
        .map(|artifact| format!("file '{}'\n", escape_manifest_path(artifact.path())))
        .join("");

    let manifest_path = TempPath::from_path(workdir.join("concat.txt"));
    let output = TempPath::from_path(workdir.join("final.mp4"));

    fs_err::tokio::write(&*manifest_path, manifest).await?;

    encoder
        .encode(EncodeRequest {
            input: &manifest_path,
            output: &output,
            template: &Template::Concat,
        })
        .await?;

    Ok(output)
}

/// Sends every artifact separately in the given order. A failure to send
/// one artifact doesn't prevent sending the rest of them.
pub(crate) async fn deliver_per_unit(
    artifacts: &[(&WorkUnit, &Artifact)],
    texts: &dyn JobTexts,
    sink: &dyn MediaSink,
    config: &Config,
) -> Vec<(usize, Error)> {
    let mut failures = vec![];

    for (unit, artifact) in artifacts {
        let caption = texts.caption(unit, artifact);
        let media = OutgoingMedia {
            path: artifact.path(),
            method: SendMethod::select(
                artifact.kind(),
                artifact.size(),
                SendLimits::from_config(config),
            ),
            caption: caption.as_deref(),
        };

        if let Err(err) = send_with_retry(sink, media, config.send_attempts).await {
            warn!(
                err = tracing_err(&err),
                ordinal = unit.ordinal,
                artifact = ?artifact,
                "Failed to deliver the artifact"
            );
            failures.push((unit.ordinal, err));
        }
    }

    failures
}

/// Quoting rules of the ffmpeg concat demuxer
fn escape_manifest_path(path: &Path) -> String {
    path.display().to_string().replace('\'', r"'\''")
}
