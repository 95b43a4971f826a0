//! Invocations of the external encoder

mod ffmpeg;

use crate::pipeline::MediaKind;
use crate::{err, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub(crate) use ffmpeg::Ffmpeg;

/// Fixed argument template of a single encoder invocation
#[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Template {
    /// Loop a single image for the given duration at a fixed resolution
    Slideshow { duration: Duration },

    /// Join the clips listed in a concat manifest without re-encoding
    Concat,

    /// Draw the upper-cased captions at the top and the bottom of an image
    Overlay { top: String, bottom: String },

    /// Play the video at half of its speed
    SlowMotion,

    /// Re-encode the video at a lower quality and resolution
    Compress,

    Mp3,

    /// Opus audio in an ogg container, as required for voice notes
    VoiceOpus,

    /// Square 512x512 webp image, first frame of the input if it's a video
    Sticker,
}

impl Template {
    pub(crate) fn name(&self) -> &'static str {
        self.into()
    }

    pub(crate) fn output_extension(&self) -> &'static str {
        match self {
            Self::Slideshow { .. } | Self::Concat | Self::SlowMotion | Self::Compress => "mp4",
            Self::Overlay { .. } => "jpg",
            Self::Mp3 => "mp3",
            Self::VoiceOpus => "ogg",
            Self::Sticker => "webp",
        }
    }

    /// Video and mp3 outputs below the configured floor are broken encodes.
    /// Stickers, memes and voice notes are legitimately tiny, so any
    /// non-empty file is accepted for them.
    pub(crate) fn min_output_size(&self, floor: u64) -> u64 {
        match self {
            Self::Slideshow { .. }
            | Self::Concat
            | Self::SlowMotion
            | Self::Compress
            | Self::Mp3 => floor,
            Self::Overlay { .. } | Self::VoiceOpus | Self::Sticker => 1,
        }
    }

    pub(crate) fn output_kind(&self) -> MediaKind {
        match self {
            Self::Slideshow { .. } | Self::Concat | Self::SlowMotion | Self::Compress => {
                MediaKind::Video
            }
            Self::Overlay { .. } => MediaKind::Image,
            Self::Mp3 => MediaKind::Audio,
            Self::VoiceOpus => MediaKind::Voice,
            Self::Sticker => MediaKind::Sticker,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EncodeRequest<'a> {
    pub(crate) input: &'a Path,

    /// Pre-assigned unique path where the output must appear
    pub(crate) output: &'a Path,

    pub(crate) template: &'a Template,
}

#[async_trait]
pub(crate) trait Encoder: Send + Sync {
    /// Runs the encoder. Succeeds only if the output file exists and is not
    /// smaller than the size floor of the template.
    async fn encode(&self, request: EncodeRequest<'_>) -> Result;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum MediaConvError {
    #[error("The encoder didn't produce the output file at {path}")]
    MissingOutput {
        path: String,
        source: std::io::Error,
    },

    #[error(
        "The encoder output at {path} has only {size} bytes \
        (at least {min_size} expected), treating it as a broken encode"
    )]
    UndersizedOutput {
        path: String,
        size: u64,
        min_size: u64,
    },
}

/// Checks that the output is present and is not a zero-byte or corrupt one
pub(crate) async fn verify_output(path: &Path, min_size: u64) -> Result<u64> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|source| {
            err!(MediaConvError::MissingOutput {
                path: path.display().to_string(),
                source,
            })
        })?
        .len();

    if size < min_size {
        return Err(err!(MediaConvError::UndersizedOutput {
            path: path.display().to_string(),
            size,
            min_size,
        }));
    }

    Ok(size)
}
