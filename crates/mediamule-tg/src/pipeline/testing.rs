//! In-memory fakes of the pipeline's external collaborators

use super::{
    Artifact, AttemptCtx, AttemptOutcome, Candidate, ConcurrencyLimiter, JobReport, JobTexts,
    MediaKind, MediaSink, OutgoingMedia, SendMethod, StatusSink, Strategy, TransportError,
    WorkUnit,
};
use crate::media_conv::{EncodeRequest, Encoder, Template};
use crate::{fatal, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Big enough to pass the output size floor of the default config
const FAKE_MEDIA_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub(crate) enum FakeStep {
    Video,
    Image,
    Retryable,
    Fatal,
    Empty,
    Hang,
    Delay(Duration, Box<FakeStep>),
}

impl FakeStep {
    pub(crate) fn delayed(self, delay: Duration) -> Self {
        Self::Delay(delay, Box::new(self))
    }
}

type Plan = Box<dyn Fn(&WorkUnit) -> FakeStep + Send + Sync>;

pub(crate) struct FakeCandidate {
    id: String,
    plan: Plan,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: Mutex<Vec<usize>>,
}

impl FakeCandidate {
    pub(crate) fn new(id: &str, step: FakeStep) -> Arc<Self> {
        Self::per_unit(id, move |_| step.clone())
    }

    /// The outcome of the attempt is decided by the unit
    pub(crate) fn per_unit(
        id: &str,
        plan: impl Fn(&WorkUnit) -> FakeStep + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            plan: Box::new(plan),
            calls: Default::default(),
            active: Default::default(),
            max_active: Default::default(),
            completed: Default::default(),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Max number of attempts that were running at the same time
    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Ordinals of the units in the order their attempts finished
    pub(crate) fn completed(&self) -> Vec<usize> {
        self.completed.lock().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Candidate for FakeCandidate {
    fn id(&self) -> &str {
        &self.id
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let mut step = (self.plan)(unit);
        while let FakeStep::Delay(delay, next) = step {
            tokio::time::sleep(delay).await;
            step = *next;
        }

        let (extension, kind) = match step {
            FakeStep::Video => ("mp4", MediaKind::Video),
            FakeStep::Image => ("png", MediaKind::Image),
            FakeStep::Retryable => {
                return AttemptOutcome::Retryable(fatal!("the service is overloaded"))
            }
            FakeStep::Fatal => return AttemptOutcome::Fatal(fatal!("unsupported input")),
            FakeStep::Empty => return AttemptOutcome::Success(vec![]),
            FakeStep::Hang => std::future::pending().await,
            FakeStep::Delay(..) => unreachable!(),
        };

        let artifact = Artifact::write(
            ctx.output_path(unit, extension),
            &[7; FAKE_MEDIA_SIZE],
            kind,
            self.id.as_str(),
        )
        .await
        .unwrap();

        self.completed.lock().push(unit.ordinal);

        AttemptOutcome::Success(vec![artifact])
    }
}

pub(crate) fn strategy_of(
    capacity: usize,
    candidates: impl IntoIterator<Item = Arc<FakeCandidate>>,
) -> Strategy {
    Strategy::new(
        ConcurrencyLimiter::new("test", capacity),
        candidates
            .into_iter()
            .map(|candidate| candidate as Arc<dyn Candidate>)
            .collect(),
    )
}

#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub(crate) template: Template,
    pub(crate) input: PathBuf,
    pub(crate) output: PathBuf,

    /// File names listed in the concat manifest
    pub(crate) manifest: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeEncoder {
    fail: bool,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeEncoder {
    /// Leaves a truncated output behind and fails, like a crashed encoder
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub(crate) fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(&self, request: EncodeRequest<'_>) -> Result {
        let manifest = if *request.template == Template::Concat {
            manifest_file_names(request.input)
        } else {
            vec![]
        };

        self.invocations.lock().push(Invocation {
            template: request.template.clone(),
            input: request.input.to_path_buf(),
            output: request.output.to_path_buf(),
            manifest,
        });

        if self.fail {
            std::fs::write(request.output, b"\0\0\0").unwrap();
            return Err(fatal!("ffmpeg exited with status 1"));
        }

        std::fs::write(request.output, vec![1; FAKE_MEDIA_SIZE]).unwrap();
        Ok(())
    }
}

fn manifest_file_names(manifest: &Path) -> Vec<String> {
    std::fs::read_to_string(manifest)
        .unwrap()
        .lines()
        .map(|line| {
            let path = line
                .strip_prefix("file '")
                .and_then(|line| line.strip_suffix('\''))
                .unwrap();
            file_name(Path::new(path))
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[derive(Debug, Clone)]
pub(crate) struct SentMedia {
    pub(crate) name: String,
    pub(crate) method: SendMethod,
    pub(crate) caption: Option<String>,
}

#[derive(Default)]
struct SinkState {
    network_failures_left: usize,
    reject: bool,
    attempts: usize,
    sent: Vec<SentMedia>,
}

#[derive(Default)]
pub(crate) struct FakeMediaSink {
    state: Mutex<SinkState>,
}

impl FakeMediaSink {
    pub(crate) fn fail_with_network_errors(&self, count: usize) {
        self.state.lock().network_failures_left = count;
    }

    pub(crate) fn reject_all(&self) {
        self.state.lock().reject = true;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    pub(crate) fn sent(&self) -> Vec<SentMedia> {
        self.state.lock().sent.clone()
    }

    pub(crate) fn sent_names(&self) -> Vec<String> {
        self.sent().into_iter().map(|media| media.name).collect()
    }
}

#[async_trait]
impl MediaSink for FakeMediaSink {
    async fn send(&self, media: OutgoingMedia<'_>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if state.reject {
            return Err(TransportError::Rejected {
                source: "Request Entity Too Large".into(),
            });
        }

        if state.network_failures_left > 0 {
            state.network_failures_left -= 1;
            return Err(TransportError::Network {
                source: "connection reset by peer".into(),
            });
        }

        state.sent.push(SentMedia {
            name: file_name(media.path),
            method: media.method,
            caption: media.caption.map(ToOwned::to_owned),
        });

        Ok(())
    }
}

pub(crate) struct NullStatus;

#[async_trait]
impl StatusSink for NullStatus {
    async fn show(&self, _text: &str) -> Result {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingStatus {
    shown: Arc<Mutex<Vec<String>>>,
}

impl RecordingStatus {
    pub(crate) fn shown(&self) -> Vec<String> {
        self.shown.lock().clone()
    }
}

#[async_trait]
impl StatusSink for RecordingStatus {
    async fn show(&self, text: &str) -> Result {
        self.shown.lock().push(text.to_owned());
        Ok(())
    }
}

pub(crate) struct FakeTexts;

impl JobTexts for FakeTexts {
    fn caption(&self, unit: &WorkUnit, _artifact: &Artifact) -> Option<String> {
        Some(format!("unit {}", unit.ordinal))
    }

    fn summary(&self, report: &JobReport) -> String {
        let tally = report.tally();
        format!("done: {} ok, {} failed", tally.succeeded, tally.failed)
    }

    fn nothing_produced(&self, _report: &JobReport) -> String {
        "nothing produced".to_owned()
    }
}
