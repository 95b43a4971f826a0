//! Acquisition pipeline shared by every kind of job:
//! intake, fallback chains of candidates, post-processing and delivery.

mod artifact;
mod delivery;
mod intake;
mod job;
mod limiter;
mod progress;
mod runner;
mod strategy;
mod transform;

#[cfg(test)]
pub(crate) mod testing;

use crate::prelude::*;
use crate::util::units::{KB, MB};
use crate::Result;
use serde::Deserialize;
use std::path::PathBuf;

pub(crate) use artifact::*;
pub(crate) use delivery::*;
pub(crate) use intake::*;
pub(crate) use job::*;
pub(crate) use limiter::*;
pub(crate) use progress::*;
pub(crate) use runner::*;
pub(crate) use strategy::*;
pub(crate) use transform::*;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// Directory where the working directories of the jobs are created
    pub(crate) work_root: PathBuf,

    /// Outputs smaller than this are considered broken or empty
    pub(crate) min_output_bytes: u64,

    pub(crate) inline_photo_max_bytes: u64,
    pub(crate) inline_media_max_bytes: u64,

    /// Max number of attempts to send a single file
    pub(crate) send_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("mediamule"),
            min_output_bytes: 10 * KB,
            inline_photo_max_bytes: 10 * MB,
            inline_media_max_bytes: 50 * MB,
            send_attempts: 3,
        }
    }
}

/// Creates the work root and removes the working directories left over by
/// a previous process that didn't shut down cleanly.
pub(crate) async fn prepare_work_root(config: &Config) -> Result {
    let root = &config.work_root;

    fs_err::tokio::create_dir_all(root).await?;

    let mut entries = fs_err::tokio::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("job-") {
            continue;
        }

        let path = entry.path();
        match fs_err::tokio::remove_dir_all(&path).await {
            Ok(()) => info!(path = %path.display(), "Removed stale job directory"),
            Err(err) => warn!(
                err = tracing_err(&err),
                "Failed to remove stale job directory"
            ),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_job_directories_are_removed() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            work_root: root.path().join("work"),
            ..Default::default()
        };

        prepare_work_root(&config).await.unwrap();

        std::fs::create_dir_all(config.work_root.join("job-abc/nested")).unwrap();
        std::fs::write(config.work_root.join("job-abc/nested/u01-a0.mp4"), b"x").unwrap();
        std::fs::write(config.work_root.join("keep.txt"), b"x").unwrap();

        prepare_work_root(&config).await.unwrap();

        assert!(!config.work_root.join("job-abc").exists());
        assert!(config.work_root.join("keep.txt").exists());
    }
}
