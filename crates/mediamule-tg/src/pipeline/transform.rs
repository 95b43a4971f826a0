use super::{Artifact, MediaKind, WorkUnit};
use crate::media_conv::{EncodeRequest, Encoder, Template};
use crate::prelude::*;
use crate::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Duration of a scene clip when the unit doesn't specify one
pub(crate) const DEFAULT_CLIP_DURATION: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AudioFormat {
    Mp3,

    /// Opus in ogg, suitable for voice notes
    Voice,
}

/// Post-processing applied to every artifact of a job. The modes are
/// mutually exclusive, so at most one encode happens per artifact.
#[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum TransformMode {
    None,

    /// Turn an image into a clip of the unit's duration
    ResizeAndMux,

    OverlayText {
        top: String,
        bottom: String,
    },

    SpeedChange,
    TranscodeQuality,
    ExtractAudio(AudioFormat),
    CropSquarePack,
}

impl TransformMode {
    pub(crate) fn name(&self) -> &'static str {
        self.into()
    }

    /// Artifacts of other kinds pass through the transform unchanged
    pub(crate) fn applies_to(&self, kind: MediaKind) -> bool {
        match self {
            Self::None => false,
            Self::ResizeAndMux | Self::OverlayText { .. } => kind == MediaKind::Image,
            Self::SpeedChange | Self::TranscodeQuality => kind == MediaKind::Video,
            Self::ExtractAudio(_) => matches!(kind, MediaKind::Video | MediaKind::Audio),
            Self::CropSquarePack => matches!(kind, MediaKind::Image | MediaKind::Video),
        }
    }

    fn template(&self, unit: &WorkUnit) -> Option<Template> {
        let template = match self {
            Self::None => return None,
            Self::ResizeAndMux => Template::Slideshow {
                duration: unit.duration.unwrap_or(DEFAULT_CLIP_DURATION),
            },
            Self::OverlayText { top, bottom } => Template::Overlay {
                top: top.clone(),
                bottom: bottom.clone(),
            },
            Self::SpeedChange => Template::SlowMotion,
            Self::TranscodeQuality => Template::Compress,
            Self::ExtractAudio(AudioFormat::Mp3) => Template::Mp3,
            Self::ExtractAudio(AudioFormat::Voice) => Template::VoiceOpus,
            Self::CropSquarePack => Template::Sticker,
        };
        Some(template)
    }

    /// Produces the transformed artifact and removes the original one.
    /// A failure here is terminal for the unit, there are no fallbacks.
    #[instrument(skip_all, fields(mode = self.name(), ordinal = unit.ordinal))]
    pub(crate) async fn apply(
        &self,
        artifact: Artifact,
        unit: &WorkUnit,
        encoder: &dyn Encoder,
    ) -> Result<Artifact> {
        if !self.applies_to(artifact.kind()) {
            return Ok(artifact);
        }

        let Some(template) = self.template(unit) else {
            return Ok(artifact);
        };

        let output = derived_path(artifact.path(), self.name(), template.output_extension());

        let request = EncodeRequest {
            input: artifact.path(),
            output: &output,
            template: &template,
        };

        if let Err(err) = encoder.encode(request).await {
            remove_partial_output(&output).await;
            return Err(err);
        }

        let transformed = Artifact::adopt(output, template.output_kind(), self.name())
            .await?
            .inherit_title(&artifact);

        artifact.discard();

        Ok(transformed)
    }
}

/// Path for the output of the transform next to the input file
fn derived_path(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();

    input.with_file_name(format!("{stem}-{suffix}.{extension}"))
}

async fn remove_partial_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            err = tracing_err(&err),
            output = %output.display(),
            "Failed to remove the output of the failed transform"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::FakeEncoder;
    use crate::pipeline::Category;

    async fn artifact(dir: &Path, name: &str, kind: MediaKind) -> Artifact {
        Artifact::write(dir.join(name), &[1; 64], kind, "fake")
            .await
            .unwrap()
            .with_title("kitten")
    }

    #[test]
    fn applicability() {
        use MediaKind::*;

        let cases = [
            (TransformMode::None, vec![]),
            (TransformMode::ResizeAndMux, vec![Image]),
            (
                TransformMode::OverlayText {
                    top: "a".into(),
                    bottom: "b".into(),
                },
                vec![Image],
            ),
            (TransformMode::SpeedChange, vec![Video]),
            (TransformMode::TranscodeQuality, vec![Video]),
            (TransformMode::ExtractAudio(AudioFormat::Mp3), vec![Video, Audio]),
            (TransformMode::ExtractAudio(AudioFormat::Voice), vec![Video, Audio]),
            (TransformMode::CropSquarePack, vec![Image, Video]),
        ];

        for (mode, applicable) in cases {
            for kind in [Image, Video, Audio, Voice, Sticker, Document] {
                assert_eq!(
                    mode.applies_to(kind),
                    applicable.contains(&kind),
                    "{mode:?} {kind:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn unrelated_artifacts_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::default();
        let unit = WorkUnit::new(1, "cat", Category::Scene);

        let video = artifact(dir.path(), "u01-a0.mp4", MediaKind::Video).await;
        let path = video.path().to_path_buf();

        let output = TransformMode::ResizeAndMux
            .apply(video, &unit, &encoder)
            .await
            .unwrap();

        assert_eq!(output.path(), path);
        assert_eq!(encoder.invocations().len(), 0);
    }

    #[tokio::test]
    async fn slideshow_replaces_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::default();
        let unit = WorkUnit::new(1, "cat", Category::Scene).with_duration(Duration::from_secs(5));

        let image = artifact(dir.path(), "u01-a1.png", MediaKind::Image).await;
        let image_path = image.path().to_path_buf();

        let clip = TransformMode::ResizeAndMux
            .apply(image, &unit, &encoder)
            .await
            .unwrap();

        assert_eq!(clip.kind(), MediaKind::Video);
        assert_eq!(clip.path(), dir.path().join("u01-a1-resize_and_mux.mp4"));
        assert_eq!(clip.title(), Some("kitten"));
        assert_eq!(clip.source(), "resize_and_mux");
        assert!(!image_path.exists());

        let invocations = encoder.invocations();
        assert_eq!(
            invocations[0].template,
            Template::Slideshow {
                duration: Duration::from_secs(5)
            }
        );
    }

    #[tokio::test]
    async fn failed_encode_is_terminal_and_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::failing();
        let unit = WorkUnit::new(2, "https://youtu.be/x", Category::Media);

        let video = artifact(dir.path(), "u02-a0.mp4", MediaKind::Video).await;

        TransformMode::SpeedChange
            .apply(video, &unit, &encoder)
            .await
            .unwrap_err();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
