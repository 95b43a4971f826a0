//! Claymation clips assembled from a script of short scenes.
//!
//! Every scene becomes a work unit served by the hosted inference models.
//! Video models are tried first, images from the image models are turned
//! into slideshow clips, and the clips are joined in the scene order.

use crate::hf::Prompts;
use crate::pipeline::{
    Artifact, Category, DeliveryMode, IntakeError, IntakeLimits, Job, JobOutcome, JobParams,
    JobReport, JobTexts, ProgressReporter, Strategy, TransformMode, UnitStatus, WorkUnit,
    DEFAULT_CLIP_DURATION,
};
use crate::prelude::*;
use crate::Result;
use itertools::Itertools;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub(crate) const LIMITS: IntakeLimits = IntakeLimits {
    unit_name: "scene",
    max_units: 2,
    max_descriptor_chars: 15,
};

const MAX_SCENE_DURATION_SECS: f64 = 10.0;

/// Longer image prompts are replaced with the short form
const MAX_IMAGE_PROMPT_CHARS: usize = 50;

pub(crate) const PROMPTS: Prompts = Prompts {
    video: video_prompt,
    image: image_prompt,
};

#[derive(Deserialize)]
struct Script {
    #[serde(default)]
    scenes: Vec<Scene>,
}

#[derive(Deserialize)]
struct Scene {
    #[serde(default)]
    text: String,

    /// Seconds
    duration: Option<f64>,
}

/// Validates the JSON scene script and turns it into work units.
///
/// ```json
/// { "scenes": [{ "text": "cat", "duration": 3 }] }
/// ```
pub(crate) fn parse_script(raw: &str) -> Result<Vec<WorkUnit>, IntakeError> {
    let script: Script = serde_json::from_str(raw.trim()).map_err(|err| {
        let message = if err.is_syntax() || err.is_eof() {
            "JSON tidak valid".to_owned()
        } else {
            format!("Format script salah: {err}")
        };
        IntakeError::Malformed { message }
    })?;

    LIMITS.check_unit_count(script.scenes.len())?;

    script
        .scenes
        .into_iter()
        .enumerate()
        .map(|(i, scene)| {
            let ordinal = i + 1;
            let label = format!("Scene {ordinal}");
            let text = LIMITS.check_descriptor(label.clone(), &scene.text)?;
            let duration = scene_duration(label, scene.duration)?;

            Ok(WorkUnit::new(ordinal, text, Category::Scene).with_duration(duration))
        })
        .collect()
}

fn scene_duration(unit: String, secs: Option<f64>) -> Result<Duration, IntakeError> {
    let Some(secs) = secs else {
        return Ok(DEFAULT_CLIP_DURATION);
    };

    if !(secs > 0.0 && secs <= MAX_SCENE_DURATION_SECS) {
        return Err(IntakeError::InvalidDuration {
            unit,
            max: MAX_SCENE_DURATION_SECS,
            actual: secs,
        });
    }

    Ok(Duration::from_secs_f64(secs))
}

pub(crate) fn video_prompt(text: &str) -> String {
    format!("claymation of {text}")
}

pub(crate) fn image_prompt(text: &str) -> String {
    let prompt = format!("claymation of {text}, cute, 3D, soft lighting");
    if prompt.chars().count() > MAX_IMAGE_PROMPT_CHARS {
        return format!("claymation {text}");
    }
    prompt
}

/// Validates the script and creates the job. Nothing is created and no
/// external call is made if the script is invalid.
pub(crate) fn plan_job(
    raw: &str,
    strategy: Strategy,
    progress: ProgressReporter,
    work_root: &Path,
) -> Result<Job> {
    let units = parse_script(raw)?;

    debug!(scenes = units.len(), "Planned a claymation job");

    let params = JobParams {
        units,
        strategies: HashMap::from([(Category::Scene, strategy)]),
        transform: TransformMode::ResizeAndMux,
        delivery: DeliveryMode::SequenceConcat,
        texts: Box::new(ClayTexts),
        progress,
    };

    Job::new(params, work_root)
}

pub(crate) const STARTED: &str = "🎨 Processing... Mohon tunggu";

struct ClayTexts;

impl JobTexts for ClayTexts {
    fn unit_status(&self, unit: &WorkUnit, total: usize) -> String {
        let ordinal = unit.ordinal;
        let text = &unit.descriptor;
        match unit.status {
            UnitStatus::Pending | UnitStatus::InProgress => {
                format!("⏳ Scene {ordinal}/{total}: {text}...")
            }
            UnitStatus::Succeeded => format!("⏳ ✅ Scene {ordinal}: {text}"),
            UnitStatus::Failed => format!("⏳ ❌ Scene {ordinal}: All models failed"),
        }
    }

    fn delivering(&self, _artifacts: usize) -> String {
        "🔗 Menggabungkan video...".to_owned()
    }

    fn caption(&self, _unit: &WorkUnit, _artifact: &Artifact) -> Option<String> {
        None
    }

    fn concat_caption(&self) -> Option<String> {
        Some("✅ Clay animation ready!".to_owned())
    }

    fn summary(&self, report: &JobReport) -> String {
        let tally = report.tally();

        let failed = report
            .units
            .iter()
            .filter(|unit| unit.status == UnitStatus::Failed)
            .map(|unit| format!("❌ Scene {}: {}", unit.ordinal, unit.descriptor))
            .join("\n");

        match report.outcome {
            JobOutcome::Complete => "✅ Selesai!".to_owned(),
            JobOutcome::Partial => format!(
                "✅ Selesai! {}/{} scene berhasil\n\n{failed}",
                tally.succeeded,
                report.units.len(),
            ),
            JobOutcome::DeliveryFailed | JobOutcome::NothingProduced => {
                let reason = report
                    .failures
                    .iter()
                    .map(|failure| failure.reason.as_str())
                    .next()
                    .unwrap_or("Gagal menggabungkan video");
                format!("❌ Error: {}", reason.truncate_chars(200))
            }
        }
    }

    fn nothing_produced(&self, _report: &JobReport) -> String {
        "❌ Gagal membuat video.\n\n\
        💡 Tips:\n\
        1. Ketik /findmodels untuk cek model\n\
        2. Gunakan kata sangat sederhana\n\
        3. Coba 'cat' atau 'dog'"
            .to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_conv::Template;
    use crate::pipeline::testing::{
        strategy_of, FakeCandidate, FakeEncoder, FakeMediaSink, FakeStep, RecordingStatus,
    };
    use crate::pipeline::{Config, IntakeErrorKind, JobRunner};
    use crate::{Error, ErrorKind};
    use expect_test::{expect, Expect};
    use std::sync::Arc;

    fn rejection(raw: &str) -> IntakeError {
        parse_script(raw).unwrap_err()
    }

    #[track_caller]
    fn assert_rejected(raw: &str, expected: Expect) {
        expected.assert_eq(&rejection(raw).to_string());
    }

    #[test]
    fn valid_scripts() {
        let units = parse_script(
            r#"{"scenes": [{"text": " cat ", "duration": 3}, {"text": "dog", "duration": 1.5}]}"#,
        )
        .unwrap();

        let units: Vec<_> = units
            .iter()
            .map(|unit| (unit.ordinal, unit.descriptor.as_str(), unit.duration))
            .collect();

        assert_eq!(
            units,
            [
                (1, "cat", Some(Duration::from_secs(3))),
                (2, "dog", Some(Duration::from_millis(1500))),
            ]
        );

        let units = parse_script(r#"{"scenes": [{"text": "owl"}]}"#).unwrap();
        assert_eq!(units[0].duration, Some(DEFAULT_CLIP_DURATION));
    }

    #[test]
    fn invalid_scripts() {
        assert_rejected("{ scenes: ", expect!["JSON tidak valid"]);
        assert_rejected("{}", expect!["Perlu minimal 1 scene"]);
        assert_rejected(r#"{"scenes": []}"#, expect!["Perlu minimal 1 scene"]);
        assert_rejected(
            r#"{"scenes": [{"text": "a"}, {"text": "b"}, {"text": "c"}]}"#,
            expect!["Maksimal 2 scene, diterima 3"],
        );
        assert_rejected(
            r#"{"scenes": [{"text": "", "duration": 3}]}"#,
            expect!["Scene 1: text tidak boleh kosong"],
        );
        assert_rejected(
            r#"{"scenes": [{"text": "cat"}, {"text": "sixteen chars!!!"}]}"#,
            expect!["Scene 2: text max 15 karakter (diterima 16)"],
        );
        assert_rejected(
            r#"{"scenes": [{"text": "cat", "duration": 0}]}"#,
            expect!["Scene 1: duration harus lebih dari 0 dan maksimal 10 detik (diterima 0)"],
        );
        assert_rejected(
            r#"{"scenes": [{"text": "cat", "duration": 11}]}"#,
            expect!["Scene 1: duration harus lebih dari 0 dan maksimal 10 detik (diterima 11)"],
        );

        assert_eq!(
            rejection(r#"{"scenes": "cat"}"#).kind(),
            IntakeErrorKind::Validation
        );
    }

    #[test]
    fn prompts() {
        assert_eq!(video_prompt("cat"), "claymation of cat");
        assert_eq!(
            image_prompt("cat"),
            "claymation of cat, cute, 3D, soft lighting"
        );
        assert_eq!(image_prompt("dancing robots"), "claymation dancing robots");
    }

    #[test]
    fn rejected_scripts_never_reach_the_models() {
        let root = tempfile::tempdir().unwrap();

        let scripts = [
            r#"{"scenes":[{"text":"","duration":3}]}"#,
            r#"{"scenes":[{"text":"way too long scene","duration":3}]}"#,
            r#"{"scenes":[{"text":"a"},{"text":"b"},{"text":"c"}]}"#,
        ];

        for script in scripts {
            let candidate = FakeCandidate::new("video", FakeStep::Video);
            let progress = ProgressReporter::new(RecordingStatus::default());

            let err: Error = plan_job(script, strategy_of(1, [candidate.clone()]), progress, root.path())
                .map(drop)
                .unwrap_err();

            assert!(matches!(err.kind(), ErrorKind::Intake { .. }), "{err:?}");
            assert!(err.is_user_error());
            assert_eq!(candidate.calls(), 0);
        }

        // Not even the working directory was created
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn single_scene_job_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let candidate = FakeCandidate::new("video", FakeStep::Video);
        let status = RecordingStatus::default();
        let encoder = Arc::new(FakeEncoder::default());
        let sink = FakeMediaSink::default();

        let job = plan_job(
            r#"{"scenes":[{"text":"cat","duration":3}]}"#,
            strategy_of(1, [candidate.clone()]),
            ProgressReporter::new(status.clone()),
            root.path(),
        )
        .unwrap();

        let report = JobRunner::new(encoder.clone(), Config::default())
            .run(job, &sink)
            .await;

        assert_eq!(report.outcome, JobOutcome::Complete);
        assert_eq!(candidate.calls(), 1);

        let invocations = encoder.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].template, Template::Concat);

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].caption.as_deref(), Some("✅ Clay animation ready!"));

        assert_eq!(status.shown().last().unwrap(), "✅ Selesai!");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn image_fallback_becomes_a_slideshow() {
        let root = tempfile::tempdir().unwrap();
        let video = FakeCandidate::new("video", FakeStep::Retryable);
        let image = FakeCandidate::new("image", FakeStep::Image);
        let encoder = Arc::new(FakeEncoder::default());
        let sink = FakeMediaSink::default();

        let job = plan_job(
            r#"{"scenes":[{"text":"cat","duration":2},{"text":"dog"}]}"#,
            strategy_of(1, [video.clone(), image.clone()]),
            ProgressReporter::new(RecordingStatus::default()),
            root.path(),
        )
        .unwrap();

        let report = JobRunner::new(encoder.clone(), Config::default())
            .run(job, &sink)
            .await;

        assert_eq!(report.outcome, JobOutcome::Complete);

        let templates: Vec<_> = encoder
            .invocations()
            .into_iter()
            .map(|invocation| invocation.template)
            .collect();

        assert_eq!(templates.len(), 3);
        assert!(templates.contains(&Template::Slideshow {
            duration: Duration::from_secs(2)
        }));
        assert!(templates.contains(&Template::Slideshow {
            duration: DEFAULT_CLIP_DURATION
        }));
        assert_eq!(templates[2], Template::Concat);

        let manifest = &encoder.invocations()[2].manifest;
        assert_eq!(
            manifest,
            &["u01-a1-resize_and_mux.mp4", "u02-a1-resize_and_mux.mp4"]
        );

        assert_eq!(sink.sent_names(), ["final.mp4"]);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn nothing_produced_gives_tips() {
        let root = tempfile::tempdir().unwrap();
        let status = RecordingStatus::default();

        let job = plan_job(
            r#"{"scenes":[{"text":"cat"}]}"#,
            strategy_of(1, [FakeCandidate::new("video", FakeStep::Fatal)]),
            ProgressReporter::new(status.clone()),
            root.path(),
        )
        .unwrap();

        let sink = FakeMediaSink::default();
        JobRunner::new(Arc::new(FakeEncoder::default()), Config::default())
            .run(job, &sink)
            .await;

        assert_eq!(sink.attempts(), 0);
        expect![[r#"
            ❌ Gagal membuat video.

            💡 Tips:
            1. Ketik /findmodels untuk cek model
            2. Gunakan kata sangat sederhana
            3. Coba 'cat' atau 'dog'"#]]
        .assert_eq(status.shown().last().unwrap());
    }
}
