use super::{adopt_output, into_outcome, MediaFilter};
use crate::pipeline::{Artifact, AttemptCtx, AttemptOutcome, Candidate, WorkUnit};
use crate::util::process;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const GALLERY_DL: &str = "gallery-dl";

/// Photo posts and image galleries. Everything is downloaded into a
/// directory of its own, which is then scanned for the media files.
pub(crate) struct GalleryDlCandidate {
    pub(super) bin: String,
    pub(super) filter: MediaFilter,
    pub(super) max_entries: usize,
    pub(super) timeout: Duration,
    pub(super) min_size: u64,
}

impl GalleryDlCandidate {
    fn args(&self, unit: &WorkUnit, dir: &Path) -> Vec<String> {
        vec![
            "--range".to_owned(),
            format!("1-{}", self.max_entries),
            "--directory".to_owned(),
            dir.display().to_string(),
            "--".to_owned(),
            unit.descriptor.clone(),
        ]
    }

    async fn try_fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> Result<Vec<Artifact>> {
        let dir = ctx
            .workdir
            .join(format!("{}-gallery", unit.file_stem(ctx.attempt)));

        fs_err::tokio::create_dir_all(&dir).await?;

        ctx.progress
            .report(format!("⏳ #{} Grabbing with gallery-dl...", unit.ordinal));

        process::run(&self.bin, &self.args(unit, &dir)).await?;

        let mut artifacts = vec![];

        for path in list_files(&dir).await? {
            let artifact = adopt_output(path, self.filter, self.min_size, GALLERY_DL).await?;
            if let Some(artifact) = artifact {
                artifacts.push(artifact);
            }
        }

        Ok(artifacts)
    }
}

/// Files of the directory sorted by name, which is the order of the gallery
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs_err::tokio::read_dir(dir).await?;
    let mut files = vec![];

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();

    Ok(files)
}

#[async_trait]
impl Candidate for GalleryDlCandidate {
    fn id(&self) -> &str {
        GALLERY_DL
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> AttemptOutcome {
        into_outcome(GALLERY_DL, unit, self.try_fetch(unit, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Category;

    #[test]
    fn command_line() {
        let candidate = GalleryDlCandidate {
            bin: GALLERY_DL.to_owned(),
            filter: MediaFilter::Images,
            max_entries: 5,
            timeout: Duration::from_secs(60),
            min_size: 1024,
        };
        let unit = WorkUnit::new(
            1,
            "https://www.tiktok.com/@user/photo/7301",
            Category::PhotoPost,
        );

        assert_eq!(
            candidate.args(&unit, Path::new("/work/u01-a0-gallery")),
            [
                "--range",
                "1-5",
                "--directory",
                "/work/u01-a0-gallery",
                "--",
                "https://www.tiktok.com/@user/photo/7301",
            ]
        );
    }

    #[tokio::test]
    async fn files_are_listed_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["02.jpg", "10.jpg", "01.jpg"] {
            std::fs::write(dir.path().join(name), b"jpg").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<_> = list_files(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, ["01.jpg", "02.jpg", "10.jpg"]);
    }
}
