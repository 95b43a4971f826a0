use super::{Artifact, ConcurrencyLimiter, ProgressReporter, WorkUnit};
use crate::prelude::*;
use crate::Error;
use async_trait::async_trait;
use itertools::Itertools;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Result of a single acquisition attempt
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// The candidate produced at least one artifact. An empty list is
    /// treated the same way as [`AttemptOutcome::Retryable`].
    Success(Vec<Artifact>),

    /// The service failed in a way that another candidate may not
    Retryable(Error),

    /// The candidate can't handle this unit at all
    Fatal(Error),
}

/// Everything an attempt is allowed to touch besides the external service
pub(crate) struct AttemptCtx<'a> {
    pub(crate) workdir: &'a Path,
    pub(crate) progress: &'a ProgressReporter,

    /// Index of the candidate in the strategy
    pub(crate) attempt: usize,
}

impl AttemptCtx<'_> {
    /// Unique path in the working directory for the output of this attempt.
    /// Derived from the unit ordinal, so concurrent units never collide.
    pub(crate) fn output_path(&self, unit: &WorkUnit, extension: &str) -> PathBuf {
        self.workdir
            .join(format!("{}.{extension}", unit.file_stem(self.attempt)))
    }
}

/// One method of acquiring the media for a work unit
#[async_trait]
pub(crate) trait Candidate: Send + Sync {
    /// Identifier used in logs, metrics and failure summaries
    fn id(&self) -> &str;

    /// Upper bound of a single attempt, after which it's abandoned
    fn timeout(&self) -> Duration;

    async fn fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> AttemptOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum FailureClass {
    Retryable,
    Fatal,
    Timeout,
    Empty,
}

#[derive(Debug, Clone)]
pub(crate) struct CandidateFailure {
    pub(crate) candidate: String,
    pub(crate) class: FailureClass,
    pub(crate) reason: String,
}

/// Every candidate of the strategy failed for the unit
#[derive(Debug, Clone, thiserror::Error)]
#[error("All {} candidate(s) failed for unit {ordinal}:\n{}", failures.len(), self.summary())]
pub(crate) struct AllStrategiesFailed {
    pub(crate) ordinal: usize,
    pub(crate) failures: Vec<CandidateFailure>,
}

impl AllStrategiesFailed {
    pub(crate) fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|failure| {
                format!(
                    "- {} ({}): {}",
                    failure.candidate, failure.class, failure.reason
                )
            })
            .join("\n")
    }
}

/// Ordered list of candidates tried one after another until one succeeds.
/// Every attempt occupies a slot of the limiter of the service.
#[derive(Clone)]
pub(crate) struct Strategy {
    limiter: ConcurrencyLimiter,
    candidates: Vec<Arc<dyn Candidate>>,
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("limiter", &self.limiter)
            .field("candidates", &self.candidate_ids().collect::<Vec<_>>())
            .finish()
    }
}

impl Strategy {
    pub(crate) fn new(limiter: ConcurrencyLimiter, candidates: Vec<Arc<dyn Candidate>>) -> Self {
        Self {
            limiter,
            candidates,
        }
    }

    /// Candidates in the order they are tried
    pub(crate) fn candidate_ids(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|candidate| candidate.id())
    }

    #[instrument(skip_all, fields(ordinal = unit.ordinal))]
    pub(crate) async fn acquire(
        &self,
        unit: &WorkUnit,
        workdir: &Path,
        progress: &ProgressReporter,
    ) -> Result<Vec<Artifact>, AllStrategiesFailed> {
        let mut failures = Vec::with_capacity(self.candidates.len());

        for (attempt, candidate) in self.candidates.iter().enumerate() {
            let ctx = AttemptCtx {
                workdir,
                progress,
                attempt,
            };

            let span = info_span!("attempt", candidate = candidate.id(), attempt);

            let failure = self
                .attempt(&**candidate, unit, &ctx)
                .instrument(span)
                .await;

            let failure = match failure {
                Ok(artifacts) => return Ok(artifacts),
                Err(failure) => failure,
            };

            warn!(
                candidate = candidate.id(),
                ordinal = unit.ordinal,
                class = %failure.class,
                reason = %failure.reason,
                "Acquisition candidate failed, moving on to the next one"
            );

            failures.push(failure);
        }

        Err(AllStrategiesFailed {
            ordinal: unit.ordinal,
            failures,
        })
    }

    async fn attempt(
        &self,
        candidate: &dyn Candidate,
        unit: &WorkUnit,
        ctx: &AttemptCtx<'_>,
    ) -> Result<Vec<Artifact>, CandidateFailure> {
        let fail = |class, reason: String| CandidateFailure {
            candidate: candidate.id().to_owned(),
            class,
            reason,
        };

        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(err) => return Err(fail(FailureClass::Fatal, err.display_chain().to_string())),
        };

        let timeout = candidate.timeout();
        let (outcome, duration) = tokio::time::timeout(timeout, candidate.fetch(unit, ctx))
            .with_duration()
            .await;

        drop(permit);

        let result = match outcome {
            Ok(AttemptOutcome::Success(artifacts)) if !artifacts.is_empty() => {
                for artifact in &artifacts {
                    metrics::histogram!(
                        "acquired_artifact_bytes",
                        artifact.size() as f64,
                        "candidate" => candidate.id().to_owned()
                    );
                }
                info!(
                    count = artifacts.len(),
                    duration = tracing_duration(duration),
                    "Acquisition candidate succeeded"
                );
                Ok(artifacts)
            }
            Ok(AttemptOutcome::Success(_)) => Err(fail(
                FailureClass::Empty,
                "the candidate produced no media".to_owned(),
            )),
            Ok(AttemptOutcome::Retryable(err)) => Err(fail(
                FailureClass::Retryable,
                err.display_chain().to_string(),
            )),
            Ok(AttemptOutcome::Fatal(err)) => Err(fail(
                FailureClass::Fatal,
                err.display_chain().to_string(),
            )),
            Err(_elapsed) => Err(fail(
                FailureClass::Timeout,
                format!("no result within {timeout:.0?}"),
            )),
        };

        let outcome_label: &'static str = match &result {
            Ok(_) => "success",
            Err(failure) => failure.class.into(),
        };

        metrics::increment_counter!(
            "acquisition_attempts_total",
            "candidate" => candidate.id().to_owned(),
            "outcome" => outcome_label
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FakeCandidate, FakeStep, NullStatus};
    use crate::pipeline::{Category, WorkUnit};
    use assert_matches::assert_matches;

    fn unit() -> WorkUnit {
        WorkUnit::new(1, "cat", Category::Scene)
    }

    fn strategy(candidates: &[&Arc<FakeCandidate>]) -> Strategy {
        Strategy::new(
            ConcurrencyLimiter::new("test", 1),
            candidates
                .iter()
                .map(|candidate| Arc::clone(candidate) as Arc<dyn Candidate>)
                .collect(),
        )
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn falls_through_every_failure_class_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressReporter::new(NullStatus);

        let retryable = FakeCandidate::new("retryable", FakeStep::Retryable);
        let fatal = FakeCandidate::new("fatal", FakeStep::Fatal);
        let empty = FakeCandidate::new("empty", FakeStep::Empty);
        let hung = FakeCandidate::new("hung", FakeStep::Hang);
        let ok = FakeCandidate::new("ok", FakeStep::Video);
        let never = FakeCandidate::new("never", FakeStep::Video);

        let strategy = strategy(&[&retryable, &fatal, &empty, &hung, &ok, &never]);

        let artifacts = strategy
            .acquire(&unit(), dir.path(), &progress)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].source(), "ok");

        for candidate in [&retryable, &fatal, &empty, &hung, &ok] {
            assert_eq!(candidate.calls(), 1, "{}", candidate.id());
        }
        assert_eq!(never.calls(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn exhausted_chain_reports_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressReporter::new(NullStatus);

        let first = FakeCandidate::new("first", FakeStep::Retryable);
        let second = FakeCandidate::new("second", FakeStep::Hang);

        let err = strategy(&[&first, &second])
            .acquire(&unit(), dir.path(), &progress)
            .await
            .unwrap_err();

        assert_eq!(err.ordinal, 1);
        assert_matches!(
            err.failures.as_slice(),
            [
                CandidateFailure { candidate: a, class: FailureClass::Retryable, .. },
                CandidateFailure { candidate: b, class: FailureClass::Timeout, .. },
            ] if a == "first" && b == "second"
        );
    }

    #[test]
    fn attempt_output_paths_are_unique_per_unit_and_attempt() {
        let progress = ProgressReporter::new(NullStatus);

        let ctx = |attempt| AttemptCtx {
            workdir: Path::new("/work"),
            progress: &progress,
            attempt,
        };

        let first = WorkUnit::new(1, "a", Category::Scene);
        let second = WorkUnit::new(2, "b", Category::Scene);

        assert_eq!(
            ctx(0).output_path(&first, "mp4"),
            Path::new("/work/u01-a0.mp4")
        );
        assert_eq!(
            ctx(1).output_path(&first, "png"),
            Path::new("/work/u01-a1.png")
        );
        assert_eq!(
            ctx(0).output_path(&second, "mp4"),
            Path::new("/work/u02-a0.mp4")
        );
    }
}
