use super::{verify_output, EncodeRequest, Encoder, Template};
use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const SLIDESHOW_WIDTH: u32 = 512;
const SLIDESHOW_HEIGHT: u32 = 384;
const STICKER_SIDE: u32 = 512;

#[rustfmt::skip]
const COMMON_ARGS: &[&str] = &[
    "-hide_banner",
    "-loglevel", "error",
    "-nostdin",

    // Overwrite output file without interactive confirmation
    "-y",
];

/// [`Encoder`] that shells out to the `ffmpeg` binary
pub(crate) struct Ffmpeg {
    min_output_size: u64,
}

impl Ffmpeg {
    pub(crate) fn new(min_output_size: u64) -> Self {
        Self { min_output_size }
    }
}

#[async_trait]
impl Encoder for Ffmpeg {
    #[instrument(skip_all, fields(
        template = request.template.name(),
        input = %request.input.display(),
        output = %request.output.display(),
    ))]
    async fn encode(&self, request: EncodeRequest<'_>) -> Result {
        let captions = write_captions(&request).await?;

        let args = args(&request, &captions.paths());

        let start = std::time::Instant::now();

        let result = crate::util::process::run("ffmpeg", &args)
            .with_duration_log("Running ffmpeg")
            .await;

        let outcome = if result.is_ok() { "ok" } else { "err" };

        metrics::histogram!(
            "encoder_duration_seconds",
            start.elapsed(),
            "template" => request.template.name(),
            "result" => outcome
        );

        result?;

        let min_size = request.template.min_output_size(self.min_output_size);
        verify_output(request.output, min_size).await?;

        Ok(())
    }
}

/// Overlay captions are passed via files, so that they don't need escaping
/// for the filter graph syntax.
#[derive(Default)]
struct CaptionFiles {
    top: Option<TempPath>,
    bottom: Option<TempPath>,
}

struct CaptionPaths<'a> {
    top: Option<&'a Path>,
    bottom: Option<&'a Path>,
}

impl CaptionFiles {
    fn paths(&self) -> CaptionPaths<'_> {
        CaptionPaths {
            top: self.top.as_deref(),
            bottom: self.bottom.as_deref(),
        }
    }
}

async fn write_captions(request: &EncodeRequest<'_>) -> Result<CaptionFiles> {
    let Template::Overlay { top, bottom } = request.template else {
        return Ok(CaptionFiles::default());
    };

    let write = |suffix: &'static str, text: &str| {
        let path = caption_path(request.output, suffix);
        let text = text.trim().to_uppercase();
        async move {
            if text.is_empty() {
                return Ok::<_, crate::Error>(None);
            }
            fs_err::tokio::write(&path, text).await?;
            Ok(Some(TempPath::from_path(path)))
        }
    };

    Ok(CaptionFiles {
        top: write("top", top.as_str()).await?,
        bottom: write("bottom", bottom.as_str()).await?,
    })
}

fn caption_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name = output.file_stem().unwrap_or_default().to_os_string();
    name.push(format!(".{suffix}.txt"));
    output.with_file_name(name)
}

fn args(request: &EncodeRequest<'_>, captions: &CaptionPaths<'_>) -> Vec<String> {
    let input = request.input.to_string_lossy();
    let output = request.output.to_string_lossy();

    let template_args: Vec<String> = match request.template {
        Template::Slideshow { duration } => {
            #[rustfmt::skip]
            let args: &[&str] = &[
                // Repeat the single input image over and over
                "-loop", "1",
                "-i", &input,
                "-t", &format!("{:.3}", duration.as_secs_f64()),
                "-vf", &format!("scale={SLIDESHOW_WIDTH}:{SLIDESHOW_HEIGHT}"),
                "-c:v", "libx264",

                // Some video players can't play anything other than yuv420p
                "-pix_fmt", "yuv420p",
                &output,
            ];
            to_owned(args)
        }
        Template::Concat => {
            #[rustfmt::skip]
            let args: &[&str] = &[
                "-f", "concat",

                // Allow absolute paths in the manifest
                "-safe", "0",
                "-i", &input,

                // The clips are only joined, no re-encoding
                "-c", "copy",
                &output,
            ];
            to_owned(args)
        }
        Template::Overlay { .. } => {
            let filters = [(captions.top, "10"), (captions.bottom, "h-text_h-10")]
                .into_iter()
                .filter_map(|(path, y)| Some(drawtext(path?, y)))
                .collect::<Vec<_>>();

            // Nothing to draw, so just re-encode the image
            let filters = if filters.is_empty() {
                "null".to_owned()
            } else {
                filters.join(",")
            };

            #[rustfmt::skip]
            let args: &[&str] = &[
                "-i", &input,
                "-vf", &filters,
                "-frames:v", "1",
                "-q:v", "2",
                &output,
            ];
            to_owned(args)
        }
        Template::SlowMotion => {
            #[rustfmt::skip]
            let args: &[&str] = &[
                "-i", &input,
                "-filter:v", "setpts=2.0*PTS",
                "-filter:a", "atempo=0.5",
                &output,
            ];
            to_owned(args)
        }
        Template::Compress => {
            #[rustfmt::skip]
            let args: &[&str] = &[
                "-i", &input,
                "-vcodec", "libx264",
                "-crf", "28",
                "-preset", "fast",
                "-vf", "scale=1280:720",
                &output,
            ];
            to_owned(args)
        }
        Template::Mp3 => {
            #[rustfmt::skip]
            let args: &[&str] = &[
                "-i", &input,

                // Drop the video stream if there is any
                "-vn",
                "-ar", "44100",
                "-ac", "2",
                "-b:a", "192k",
                &output,
            ];
            to_owned(args)
        }
        Template::VoiceOpus => {
            #[rustfmt::skip]
            let args: &[&str] = &[
                "-i", &input,
                "-vn",
                "-c:a", "libopus",
                "-b:a", "64k",
                &output,
            ];
            to_owned(args)
        }
        Template::Sticker => {
            #[rustfmt::skip]
            let args: &[&str] = &[
                "-i", &input,

                // Cover the square and cut off what doesn't fit around the center
                "-vf", &format!(
                    "scale={STICKER_SIDE}:{STICKER_SIDE}:force_original_aspect_ratio=increase,\
                    crop={STICKER_SIDE}:{STICKER_SIDE}"
                ),

                // Only the first frame is taken from videos
                "-frames:v", "1",
                "-c:v", "libwebp",
                "-quality", "95",
                &output,
            ];
            to_owned(args)
        }
    };

    COMMON_ARGS
        .iter()
        .map(|&arg| arg.to_owned())
        .chain(template_args)
        .collect()
}

fn drawtext(caption: &Path, y: &str) -> String {
    format!(
        "drawtext=textfile='{}':expansion=none:fontcolor=white:fontsize=h/10:\
        borderw=3:bordercolor=black:x=(w-text_w)/2:y={y}",
        caption.display()
    )
}

fn to_owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|&arg| arg.to_owned()).collect()
}
