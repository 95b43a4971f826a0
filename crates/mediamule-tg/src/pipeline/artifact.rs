use crate::prelude::*;
use crate::util::display::human_size;
use crate::{err, IoError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum MediaKind {
    Image,
    Video,
    Audio,
    Voice,
    Sticker,
    Document,
}

impl MediaKind {
    pub(crate) fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "bmp" => Self::Image,
            "mp4" | "mkv" | "webm" | "mov" | "gif" => Self::Video,
            "mp3" | "m4a" | "aac" | "opus" | "ogg" | "wav" | "flac" => Self::Audio,
            _ => Self::Document,
        }
    }

    pub(crate) fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Document)
    }

    /// Classifies the declared `content-type` of an HTTP response
    pub(crate) fn from_content_type(content_type: &str) -> Option<Self> {
        let (ty, _) = content_type.split_once('/')?;
        match ty.trim() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// Media file produced by an acquisition or a transform.
///
/// The artifact owns its backing file. The file is removed when the artifact
/// is dropped or explicitly [discarded](Artifact::discard), whichever happens
/// first, so every file is deleted exactly once.
pub(crate) struct Artifact {
    path: TempPath,
    kind: MediaKind,
    size: u64,
    source: String,
    title: Option<String>,
}

impl Artifact {
    /// Takes the ownership of an already existing file.
    pub(crate) async fn adopt(
        path: PathBuf,
        kind: MediaKind,
        source: impl Into<String>,
    ) -> Result<Self> {
        let path = TempPath::from_path(path);
        let size = fs_err::tokio::metadata(&*path).await?.len();

        Ok(Self {
            path,
            kind,
            size,
            source: source.into(),
            title: None,
        })
    }

    pub(crate) async fn write(
        path: PathBuf,
        bytes: &[u8],
        kind: MediaKind,
        source: impl Into<String>,
    ) -> Result<Self> {
        fs_err::tokio::write(&path, bytes)
            .await
            .map_err(|source| {
                err!(IoError::WriteFile {
                    path: path.display().to_string(),
                    source,
                })
            })?;

        Self::adopt(path, kind, source).await
    }

    pub(crate) fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn kind(&self) -> MediaKind {
        self.kind
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Identifier of the candidate or transform that produced the artifact
    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Takes the title over from the artifact this one was derived from
    pub(crate) fn inherit_title(mut self, from: &Artifact) -> Self {
        self.title = from.title.clone();
        self
    }

    /// Removes the backing file right away
    pub(crate) fn discard(self) {
        let path = self.path.to_path_buf();
        if let Err(err) = self.path.close() {
            warn!(
                err = tracing_err(&err),
                path = %path.display(),
                "Failed to remove the artifact file"
            );
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("path", &self.path.display())
            .field("kind", &self.kind)
            .field("size", &human_size(self.size))
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_from_extension() {
        assert_eq!(MediaKind::from_extension("JPG"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("webm"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("opus"), MediaKind::Audio);
        assert_eq!(MediaKind::from_extension("zip"), MediaKind::Document);
        assert_eq!(
            MediaKind::from_path(Path::new("/tmp/u01-a0.mp4")),
            MediaKind::Video
        );
        assert_eq!(MediaKind::from_path(Path::new("noext")), MediaKind::Document);
    }

    #[test]
    fn media_kind_from_content_type() {
        assert_eq!(
            MediaKind::from_content_type("image/png"),
            Some(MediaKind::Image)
        );
        assert_eq!(
            MediaKind::from_content_type("video/mp4; charset=binary"),
            Some(MediaKind::Video)
        );
        assert_eq!(MediaKind::from_content_type("application/json"), None);
        assert_eq!(MediaKind::from_content_type("garbage"), None);
    }

    #[tokio::test]
    async fn artifact_file_is_removed_exactly_once() {
        let dir = tempfile::tempdir().unwrap();

        let dropped = dir.path().join("dropped.png");
        let artifact = Artifact::write(dropped.clone(), b"png", MediaKind::Image, "test")
            .await
            .unwrap();
        assert_eq!(artifact.size(), 3);
        assert!(dropped.exists());
        drop(artifact);
        assert!(!dropped.exists());

        let discarded = dir.path().join("discarded.png");
        let artifact = Artifact::write(discarded.clone(), b"png", MediaKind::Image, "test")
            .await
            .unwrap();
        artifact.discard();
        assert!(!discarded.exists());
    }
}
