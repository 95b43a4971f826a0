use super::{Artifact, JobReport, ProgressReporter, Strategy, TransformMode};
use crate::prelude::*;
use crate::{err, fatal, IoError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Kind of a work unit. Every category is served by its own [`Strategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Category {
    /// Claymation scene generated by the hosted inference models
    Scene,

    /// Video, audio or image downloaded from a social platform
    Media,

    /// Post that consists of photos only (e.g. TikTok photo posts)
    PhotoPost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum UnitStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct WorkUnit {
    /// 1-based position of the unit in the job. Defines the order of delivery.
    pub(crate) ordinal: usize,

    /// Scene text or URL
    pub(crate) descriptor: String,

    /// Desired duration of the produced clip
    pub(crate) duration: Option<Duration>,

    pub(crate) category: Category,
    pub(crate) status: UnitStatus,
}

impl WorkUnit {
    pub(crate) fn new(ordinal: usize, descriptor: impl Into<String>, category: Category) -> Self {
        Self {
            ordinal,
            descriptor: descriptor.into(),
            duration: None,
            category,
            status: UnitStatus::Pending,
        }
    }

    pub(crate) fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Stem of the files produced by the given attempt for this unit
    pub(crate) fn file_stem(&self, attempt: usize) -> String {
        format!("u{:02}-a{attempt}", self.ordinal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum DeliveryMode {
    /// All artifacts are joined into a single video in ordinal order
    SequenceConcat,

    /// Every artifact is sent separately in ordinal order
    PerUnit,
}

/// User-visible texts that differ between the kinds of jobs
pub(crate) trait JobTexts: Send + Sync {
    fn unit_status(&self, unit: &WorkUnit, total: usize) -> String {
        let icon = match unit.status {
            UnitStatus::Pending => "🕐",
            UnitStatus::InProgress => "⏳",
            UnitStatus::Succeeded => "✅",
            UnitStatus::Failed => "❌",
        };
        format!("{icon} {}/{total}: {}", unit.ordinal, unit.descriptor)
    }

    fn delivering(&self, artifacts: usize) -> String {
        format!("📤 Mengirim {artifacts} file...")
    }

    /// Caption of the artifact sent in [`DeliveryMode::PerUnit`] mode
    fn caption(&self, unit: &WorkUnit, artifact: &Artifact) -> Option<String>;

    /// Caption of the single video sent in [`DeliveryMode::SequenceConcat`] mode
    fn concat_caption(&self) -> Option<String> {
        None
    }

    /// Terminal status of a job that delivered at least one artifact
    fn summary(&self, report: &JobReport) -> String;

    /// Terminal status of a job where no unit produced anything
    fn nothing_produced(&self, report: &JobReport) -> String;
}

pub(crate) struct JobParams {
    pub(crate) units: Vec<WorkUnit>,
    pub(crate) strategies: HashMap<Category, Strategy>,
    pub(crate) transform: TransformMode,
    pub(crate) delivery: DeliveryMode,
    pub(crate) texts: Box<dyn JobTexts>,
    pub(crate) progress: ProgressReporter,
}

/// Aggregate of the work units of a single user request.
///
/// All files of the job live in its working directory, that is removed
/// together with everything inside when the job is dropped.
pub(crate) struct Job {
    pub(crate) units: Vec<WorkUnit>,
    pub(crate) strategies: HashMap<Category, Strategy>,
    pub(crate) transform: TransformMode,
    pub(crate) delivery: DeliveryMode,
    pub(crate) texts: Box<dyn JobTexts>,
    pub(crate) progress: ProgressReporter,
    pub(crate) workdir: tempfile::TempDir,
}

impl Job {
    pub(crate) fn new(params: JobParams, work_root: &Path) -> Result<Self> {
        let JobParams {
            units,
            strategies,
            transform,
            delivery,
            texts,
            progress,
        } = params;

        if let Some(unit) = units
            .iter()
            .find(|unit| !strategies.contains_key(&unit.category))
        {
            return Err(fatal!(
                "BUG: no strategy for unit {} of category {}",
                unit.ordinal,
                unit.category
            ));
        }

        let workdir = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(work_root)
            .map_err(|source| err!(IoError::CreateTempDir { source }))?;

        debug!(workdir = %workdir.path().display(), "Created job working directory");

        Ok(Self {
            units,
            strategies,
            transform,
            delivery,
            texts,
            progress,
            workdir,
        })
    }

    pub(crate) fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}
