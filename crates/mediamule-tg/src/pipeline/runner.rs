use super::{
    deliver_concat, deliver_per_unit, Artifact, Config, DeliveryMode, Job, MediaSink, UnitStatus,
    WorkUnit,
};
use crate::media_conv::Encoder;
use crate::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum FailureStage {
    Acquisition,
    Transform,
    Delivery,
}

#[derive(Debug, Clone)]
pub(crate) struct UnitFailure {
    pub(crate) ordinal: usize,
    pub(crate) stage: FailureStage,
    pub(crate) reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum JobOutcome {
    /// Every unit was delivered
    Complete,

    /// Some of the units were delivered
    Partial,

    /// No unit produced any media, nothing was sent
    NothingProduced,

    /// Media was produced, but none of it reached the chat
    DeliveryFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JobTally {
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
}

/// Final state of a job once it's done
#[derive(Debug, Clone)]
pub(crate) struct JobReport {
    /// Units with their final statuses in ordinal order
    pub(crate) units: Vec<WorkUnit>,
    pub(crate) failures: Vec<UnitFailure>,

    /// Number of files that reached the chat
    pub(crate) delivered: usize,
    pub(crate) outcome: JobOutcome,
}

impl JobReport {
    pub(crate) fn tally(&self) -> JobTally {
        let succeeded = self
            .units
            .iter()
            .filter(|unit| unit.status == UnitStatus::Succeeded)
            .count();

        JobTally {
            succeeded,
            failed: self.units.len() - succeeded,
        }
    }

    pub(crate) fn failure_of(&self, ordinal: usize) -> Option<&UnitFailure> {
        self.failures
            .iter()
            .find(|failure| failure.ordinal == ordinal)
    }
}

/// Result of the acquisition and the transform of a single unit
struct UnitRun {
    unit: WorkUnit,
    artifacts: Vec<Artifact>,
}

/// Drives the jobs through acquisition, transform, delivery and cleanup
#[derive(Clone)]
pub(crate) struct JobRunner {
    encoder: Arc<dyn Encoder>,
    config: Config,
}

impl JobRunner {
    pub(crate) fn new(encoder: Arc<dyn Encoder>, config: Config) -> Self {
        Self { encoder, config }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Runs all units of the job concurrently and delivers whatever they
    /// produced in ordinal order. The working directory of the job is
    /// removed before this returns.
    #[instrument(skip_all, fields(
        units = job.units.len(),
        transform = job.transform.name(),
        delivery = %job.delivery,
    ))]
    pub(crate) async fn run(&self, mut job: Job, sink: &dyn MediaSink) -> JobReport {
        let units = std::mem::take(&mut job.units);
        let total = units.len();

        let mut failures = vec![];

        let runs = futures::future::join_all(
            units
                .into_iter()
                .map(|unit| self.run_unit(&job, unit, total)),
        )
        .await;

        let mut runs: Vec<_> = runs
            .into_iter()
            .map(|(run, failure)| {
                failures.extend(failure);
                run
            })
            .collect();

        runs.sort_by_key(|run| run.unit.ordinal);

        let artifacts_count: usize = runs.iter().map(|run| run.artifacts.len()).sum();

        let (delivered, outcome) = if artifacts_count == 0 {
            (0, JobOutcome::NothingProduced)
        } else {
            job.progress.report(job.texts.delivering(artifacts_count));
            self.deliver(&job, &mut runs, &mut failures, sink).await
        };

        failures.sort_by_key(|failure| failure.ordinal);

        let units = runs
            .into_iter()
            .map(|UnitRun { unit, artifacts }| {
                drop(artifacts);
                unit
            })
            .collect();

        let report = JobReport {
            units,
            failures,
            delivered,
            outcome,
        };

        let text = match outcome {
            JobOutcome::NothingProduced => job.texts.nothing_produced(&report),
            _ => job.texts.summary(&report),
        };

        job.progress.finish(text).await;

        let tally = report.tally();

        info!(
            %outcome,
            succeeded = tally.succeeded,
            failed = tally.failed,
            delivered,
            "Job finished"
        );

        metrics::increment_counter!("jobs_total", "outcome" => <&'static str>::from(outcome));

        let workdir = job.workdir.path().to_path_buf();
        if let Err(err) = job.workdir.close() {
            warn!(
                err = tracing_err(&err),
                workdir = %workdir.display(),
                "Failed to remove the job working directory"
            );
        }

        report
    }

    async fn run_unit(
        &self,
        job: &Job,
        mut unit: WorkUnit,
        total: usize,
    ) -> (UnitRun, Option<UnitFailure>) {
        unit.status = UnitStatus::InProgress;
        job.progress.report(job.texts.unit_status(&unit, total));

        let result = self.produce(job, &unit).await;

        let (artifacts, failure) = match result {
            Ok(artifacts) => {
                unit.status = UnitStatus::Succeeded;
                (artifacts, None)
            }
            Err(failure) => {
                warn!(
                    ordinal = unit.ordinal,
                    stage = %failure.stage,
                    reason = %failure.reason,
                    "Work unit failed"
                );
                unit.status = UnitStatus::Failed;
                (vec![], Some(failure))
            }
        };

        job.progress.report(job.texts.unit_status(&unit, total));

        (UnitRun { unit, artifacts }, failure)
    }

    async fn produce(&self, job: &Job, unit: &WorkUnit) -> Result<Vec<Artifact>, UnitFailure> {
        let fail = |stage, reason: String| UnitFailure {
            ordinal: unit.ordinal,
            stage,
            reason,
        };

        let strategy = job.strategies.get(&unit.category).ok_or_else(|| {
            fail(
                FailureStage::Acquisition,
                format!("no strategy for the category {}", unit.category),
            )
        })?;

        let artifacts = strategy
            .acquire(unit, job.workdir(), &job.progress)
            .await
            .map_err(|err| fail(FailureStage::Acquisition, err.summary()))?;

        let mut transformed = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let artifact = job
                .transform
                .apply(artifact, unit, &*self.encoder)
                .await
                .map_err(|err| fail(FailureStage::Transform, err.display_chain().to_string()))?;

            transformed.push(artifact);
        }

        Ok(transformed)
    }

    async fn deliver(
        &self,
        job: &Job,
        runs: &mut [UnitRun],
        failures: &mut Vec<UnitFailure>,
        sink: &dyn MediaSink,
    ) -> (usize, JobOutcome) {
        let failed_ordinals: Vec<(usize, String)> = match job.delivery {
            DeliveryMode::SequenceConcat => {
                let artifacts: Vec<_> = runs.iter().flat_map(|run| &run.artifacts).collect();

                let result = deliver_concat(
                    &artifacts,
                    &*job.texts,
                    &*self.encoder,
                    sink,
                    job.workdir(),
                    &self.config,
                )
                .await;

                match result {
                    Ok(()) => vec![],
                    Err(err) => {
                        warn!(err = tracing_err(&err), "Failed to deliver the joined video");
                        let reason = err.display_chain().to_string();
                        runs.iter()
                            .filter(|run| !run.artifacts.is_empty())
                            .map(|run| (run.unit.ordinal, reason.clone()))
                            .collect()
                    }
                }
            }
            DeliveryMode::PerUnit => {
                let artifacts: Vec<_> = runs
                    .iter()
                    .flat_map(|run| run.artifacts.iter().map(move |artifact| (&run.unit, artifact)))
                    .collect();

                deliver_per_unit(&artifacts, &*job.texts, sink, &self.config)
                    .await
                    .into_iter()
                    .map(|(ordinal, err)| (ordinal, err.display_chain().to_string()))
                    .collect()
            }
        };

        let delivered = match job.delivery {
            DeliveryMode::SequenceConcat if failed_ordinals.is_empty() => 1,
            DeliveryMode::SequenceConcat => 0,
            DeliveryMode::PerUnit => {
                let sent: usize = runs.iter().map(|run| run.artifacts.len()).sum();
                sent - failed_ordinals.len()
            }
        };

        for run in runs.iter_mut() {
            let failed_sends = failed_ordinals
                .iter()
                .filter(|(ordinal, _)| *ordinal == run.unit.ordinal)
                .count();

            // A unit with several artifacts counts as delivered if any of them was sent
            if failed_sends == 0 || failed_sends < run.artifacts.len() {
                continue;
            }

            run.unit.status = UnitStatus::Failed;
        }

        failures.extend(
            failed_ordinals
                .into_iter()
                .map(|(ordinal, reason)| UnitFailure {
                    ordinal,
                    stage: FailureStage::Delivery,
                    reason,
                }),
        );

        let succeeded = runs
            .iter()
            .filter(|run| run.unit.status == UnitStatus::Succeeded)
            .count();

        let outcome = if succeeded == 0 {
            JobOutcome::DeliveryFailed
        } else if succeeded == runs.len() {
            JobOutcome::Complete
        } else {
            JobOutcome::Partial
        };

        (delivered, outcome)
    }
}
