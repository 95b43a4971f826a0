use super::link::{parse_url, Platform};
use super::Config;
use crate::pipeline::{
    Artifact, AudioFormat, Category, IntakeError, JobReport, JobTexts, TransformMode, UnitStatus,
    WorkUnit,
};
use crate::prelude::*;
use crate::util::display::human_size;
use itertools::Itertools;
use url::Url;

/// Prefix that makes yt-dlp search YouTube and take the first result
const MUSIC_SEARCH_PREFIX: &str = "ytsearch1:";

/// Max number of characters of the media title in the caption
const MAX_CAPTION_TITLE_CHARS: usize = 100;

/// What the user asked for and how they asked it
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum DownloadCommand {
    Tiktok,
    Ig,
    Yt,
    X,
    Fb,
    Reddit,
    Sticker,
    Compress,
    Music,
    Playlist,
    Slowmo,
    Meme,
    Voice,
    Batch,

    /// Plain link sent without a command
    Link,
}

/// Post-processing and wording of a download job
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DownloadMode {
    Plain,
    Sticker,
    Compress,
    Slowmo,
    Voice,
    Music,
    Playlist,
    Meme { top: String, bottom: String },
    Batch,
}

impl DownloadMode {
    pub(crate) fn transform(&self) -> TransformMode {
        match self {
            Self::Plain | Self::Playlist | Self::Batch => TransformMode::None,
            Self::Sticker => TransformMode::CropSquarePack,
            Self::Compress => TransformMode::TranscodeQuality,
            Self::Slowmo => TransformMode::SpeedChange,
            Self::Voice => TransformMode::ExtractAudio(AudioFormat::Voice),
            Self::Music => TransformMode::ExtractAudio(AudioFormat::Mp3),
            Self::Meme { top, bottom } => TransformMode::OverlayText {
                top: top.clone(),
                bottom: bottom.clone(),
            },
        }
    }

    /// Only the audio track is downloaded, galleries are of no use
    pub(crate) fn is_audio(&self) -> bool {
        matches!(self, Self::Voice | Self::Music)
    }

    /// Status shown while the media is being fetched
    fn working_label(&self) -> &'static str {
        match self {
            Self::Plain | Self::Playlist | Self::Batch => "Sedang download",
            Self::Sticker => "Sticker",
            Self::Compress => "Compress",
            Self::Slowmo => "Slowmo",
            Self::Voice => "Voice",
            Self::Music => "Extracting audio",
            Self::Meme { .. } => "Meme",
        }
    }

    fn caption_suffix(&self, artifact: &Artifact) -> String {
        match self {
            Self::Meme { .. } => " 😂 Meme Mode!".to_owned(),
            Self::Voice => " 🔊 Voice Note!".to_owned(),
            Self::Slowmo => format!(" (Slowmo: {})", human_size(artifact.size())),
            Self::Compress => format!(" (Compressed: {})", human_size(artifact.size())),
            Self::Plain | Self::Sticker | Self::Music | Self::Playlist | Self::Batch => {
                String::new()
            }
        }
    }
}

/// Source of a single work unit
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    Url(Url),

    /// Free-form query resolved by the downloader itself
    Search(String),
}

impl Target {
    pub(crate) fn descriptor(&self) -> String {
        match self {
            Self::Url(url) => url.to_string(),
            Self::Search(query) => format!("{MUSIC_SEARCH_PREFIX}{query}"),
        }
    }
}

/// Validated request of the user. Nothing was downloaded yet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DownloadRequest {
    pub(crate) command: DownloadCommand,
    pub(crate) mode: DownloadMode,
    pub(crate) targets: Vec<Target>,
}

impl DownloadRequest {
    /// First status text of the job
    pub(crate) fn announcement(&self) -> String {
        match (&self.command, self.targets.as_slice()) {
            (DownloadCommand::Link, [Target::Url(url)]) => {
                format!("Auto {} mode! ⏳", Platform::detect(url))
            }
            (DownloadCommand::Music, [Target::Search(query)]) => {
                format!("Searching music: {query}... 🎵")
            }
            (DownloadCommand::Batch, targets) => {
                format!("Starting batch {} items... ⏳", targets.len())
            }
            _ => format!("{}... 0% ⏳", self.mode.working_label()),
        }
    }
}

impl DownloadCommand {
    pub(crate) fn usage(self) -> &'static str {
        match self {
            Self::Tiktok => "Gunakan: /tiktok <link>",
            Self::Ig => "Gunakan: /ig <link> (post/reel)",
            Self::Yt => "Gunakan: /yt <link> (video/playlist)",
            Self::X => "Gunakan: /x <link> (status/video)",
            Self::Fb => "Gunakan: /fb <link> (video/post)",
            Self::Reddit => "Gunakan: /reddit <link> (post/video)",
            Self::Sticker => "Gunakan: /sticker <link>",
            Self::Compress => "Gunakan: /compress <link>",
            Self::Music => "Gunakan: /music <query>",
            Self::Playlist => "Gunakan: /playlist <link>",
            Self::Slowmo => "Gunakan: /slowmo <link>",
            Self::Meme => "Gunakan: /meme <top> | <bottom> <link>",
            Self::Voice => "Gunakan: /voice <link>",
            Self::Batch => "Gunakan: /batch <link1> <link2> ...",
            Self::Link => "Kirim link valid ya! Contoh: https://www.tiktok.com/@user/video/123",
        }
    }

    fn usage_error(self) -> IntakeError {
        IntakeError::Empty {
            what: self.usage().to_owned(),
        }
    }

    /// Validates the arguments of the command. Never touches the network.
    pub(crate) fn parse(self, args: &str, config: &Config) -> Result<DownloadRequest, IntakeError> {
        let args = args.trim();
        let limits = config.intake_limits();

        let request = |mode, targets| DownloadRequest {
            command: self,
            mode,
            targets,
        };

        let checked_url = |unit: &str, text: &str| -> Result<Url, IntakeError> {
            parse_url(&limits.check_descriptor(unit.to_owned(), text)?)
        };

        let single_url = |mode| -> Result<DownloadRequest, IntakeError> {
            if args.is_empty() {
                return Err(self.usage_error());
            }
            Ok(request(mode, vec![Target::Url(checked_url("Link", args)?)]))
        };

        match self {
            Self::Tiktok | Self::Ig | Self::Yt | Self::X | Self::Fb | Self::Reddit => {
                single_url(DownloadMode::Plain)
            }
            Self::Link => {
                if args.is_empty() {
                    return Err(self.usage_error());
                }
                let link = limits.check_descriptor("Link".to_owned(), args)?;
                let url = parse_url(&link).map_err(|_| self.usage_error())?;
                Ok(request(DownloadMode::Plain, vec![Target::Url(url)]))
            }
            Self::Sticker => single_url(DownloadMode::Sticker),
            Self::Compress => single_url(DownloadMode::Compress),
            Self::Playlist => single_url(DownloadMode::Playlist),
            Self::Slowmo => single_url(DownloadMode::Slowmo),
            Self::Voice => single_url(DownloadMode::Voice),
            Self::Music => {
                if args.is_empty() {
                    return Err(self.usage_error());
                }
                let query = limits.check_descriptor("Query".to_owned(), args)?;
                Ok(request(DownloadMode::Music, vec![Target::Search(query)]))
            }
            Self::Meme => {
                let (top, bottom, url) = parse_meme_args(args).ok_or_else(|| self.usage_error())?;

                // One of the captions may be empty
                for (unit, caption) in [("Top", &top), ("Bottom", &bottom)] {
                    if !caption.is_empty() {
                        limits.check_descriptor(unit.to_owned(), caption)?;
                    }
                }

                Ok(request(
                    DownloadMode::Meme { top, bottom },
                    vec![Target::Url(checked_url("Link", url)?)],
                ))
            }
            Self::Batch => {
                let links = args.split_whitespace().collect_vec();
                if links.is_empty() {
                    return Err(self.usage_error());
                }
                limits.check_unit_count(links.len())?;

                let targets = links
                    .into_iter()
                    .enumerate()
                    .map(|(i, link)| {
                        checked_url(&format!("Link {}", i + 1), link).map(Target::Url)
                    })
                    .collect::<Result<_, _>>()?;

                Ok(request(DownloadMode::Batch, targets))
            }
        }
    }
}

/// `<top> | <bottom> <link>`, where the link is the last word
fn parse_meme_args(args: &str) -> Option<(String, String, &str)> {
    let (captions, url) = args.rsplit_once(char::is_whitespace)?;
    let (top, bottom) = captions.split_once('|')?;
    let (top, bottom) = (top.trim(), bottom.trim());

    if top.is_empty() && bottom.is_empty() {
        return None;
    }

    Some((top.to_owned(), bottom.to_owned(), url))
}

/// Wording of the download jobs
pub(crate) struct DownloadTexts {
    pub(crate) mode: DownloadMode,
}

impl DownloadTexts {
    fn success(&self, report: &JobReport) -> String {
        let sent = report.delivered;

        if report
            .units
            .iter()
            .all(|unit| unit.category == Category::PhotoPost)
        {
            return format!("Gallery complete! Sent {sent} photos. 📸");
        }

        match &self.mode {
            DownloadMode::Sticker => format!("Sticker ready! Sent {sent} stickers. 🔥"),
            DownloadMode::Compress => format!("Compressed & sent! {sent} files ready. 💨"),
            DownloadMode::Playlist => format!("Playlist done! Sent first {sent} tracks. 📂"),
            DownloadMode::Music => format!("Music sent! 🎵 ({sent} tracks)"),
            DownloadMode::Slowmo => format!("Slowmo magic! Sent {sent} clips. 🐌"),
            DownloadMode::Meme { .. } => "Meme created! Laugh out loud 😂".to_owned(),
            DownloadMode::Voice => "Voice note ready! 🔊".to_owned(),
            DownloadMode::Plain | DownloadMode::Batch if sent > 1 => {
                format!("Batch complete! Sent {sent} files. 🎉")
            }
            DownloadMode::Plain | DownloadMode::Batch => "Download selesai! 🎉".to_owned(),
        }
    }

    /// Hint for the first line of the failure reason
    fn error_hint(&self, unit: &WorkUnit, reason: &str) -> Option<&'static str> {
        let reason = reason.to_lowercase();
        if reason.contains("unsupported url") && unit.descriptor.contains("tiktok.com") {
            return Some("TikTok unsupported di yt-dlp. Coba /tiktok buat auto! 📸");
        }
        if self.mode.is_audio() {
            return Some("(FFmpeg missing? pkg install ffmpeg)");
        }
        if matches!(self.mode, DownloadMode::Meme { .. } | DownloadMode::Sticker)
            && reason.contains("format")
        {
            return Some("(Coba link image valid)");
        }
        None
    }

    fn failure_lines(&self, report: &JobReport) -> String {
        report
            .units
            .iter()
            .filter_map(|unit| {
                let failure = report.failure_of(unit.ordinal)?;
                let reason = first_meaningful_line(&failure.reason);
                let hint = self
                    .error_hint(unit, &failure.reason)
                    .map(|hint| format!(" {hint}"))
                    .unwrap_or_default();
                Some(format!(
                    "❌ {}: {}{hint}",
                    unit.ordinal,
                    reason.truncate_chars(MAX_CAPTION_TITLE_CHARS)
                ))
            })
            .join("\n")
    }
}

/// Failure reasons are lists of candidate errors, the first one is the
/// most relevant for the user
fn first_meaningful_line(reason: &str) -> &str {
    reason
        .lines()
        .map(|line| line.trim().trim_start_matches("- "))
        .find(|line| !line.is_empty())
        .unwrap_or("unknown error")
}

impl JobTexts for DownloadTexts {
    fn unit_status(&self, unit: &WorkUnit, total: usize) -> String {
        let label = self.mode.working_label();
        match unit.status {
            UnitStatus::Pending | UnitStatus::InProgress if total == 1 => {
                format!("{label}... ⏳")
            }
            UnitStatus::Pending | UnitStatus::InProgress => {
                format!("{label}... ⏳ {}/{total}", unit.ordinal)
            }
            UnitStatus::Succeeded => format!("✅ {}/{total} ready", unit.ordinal),
            UnitStatus::Failed => format!("❌ {}/{total} failed", unit.ordinal),
        }
    }

    fn caption(&self, unit: &WorkUnit, artifact: &Artifact) -> Option<String> {
        if unit.category == Category::PhotoPost {
            return Some(format!("Photo from: {}", unit.descriptor));
        }

        let title = artifact
            .title()
            .unwrap_or("Unknown")
            .truncate_chars(MAX_CAPTION_TITLE_CHARS);

        let suffix = self.mode.caption_suffix(artifact);

        Some(format!("{title}... from: {}{suffix}", unit.descriptor))
    }

    fn summary(&self, report: &JobReport) -> String {
        let success = self.success(report);
        if report.failures.is_empty() {
            return success;
        }
        format!("{success}\n\n{}", self.failure_lines(report))
    }

    fn nothing_produced(&self, report: &JobReport) -> String {
        if report.failures.is_empty() {
            return "Download ok, but no valid file (empty?). Cek log. 😅".to_owned();
        }
        format!("Download error:\n{}", self.failure_lines(report))
    }
}
