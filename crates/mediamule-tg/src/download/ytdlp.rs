use super::{adopt_output, into_outcome, MediaFilter};
use crate::pipeline::{Artifact, AttemptCtx, AttemptOutcome, Candidate, WorkUnit};
use crate::prelude::*;
use crate::util::process;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const YT_DLP: &str = "yt-dlp";

const PROGRESS_MARKER: &str = "[progress]";

/// Format selection of the download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum YtDlpFormat {
    /// Best single file with both audio and video
    Video,
    Audio,
}

pub(crate) struct YtDlpCandidate {
    pub(super) bin: String,
    pub(super) format: YtDlpFormat,

    /// Number of the playlist entries to take. Without it the whole
    /// playlist behind the link is downloaded.
    pub(super) playlist_end: Option<usize>,
    pub(super) timeout: Duration,
    pub(super) min_size: u64,
}

/// Output file declared by yt-dlp once it's finished with it
#[derive(Debug, Deserialize, PartialEq)]
struct DeclaredOutput {
    title: Option<String>,
    filepath: PathBuf,
}

#[derive(Debug, PartialEq)]
struct DownloadProgress {
    percent: String,
    speed: String,
    eta: String,
}

impl DownloadProgress {
    fn percent(&self) -> Option<f64> {
        self.percent.trim_end_matches('%').trim().parse().ok()
    }
}

#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(DownloadProgress),
    Output(DeclaredOutput),
    Other,
}

fn parse_line(line: &str) -> OutputLine {
    let line = lazy_regex::regex_replace_all!(r"\x1b\[[0-9;]*m", line, "");
    let line = line.trim();

    if let Some(progress) = line.strip_prefix(PROGRESS_MARKER) {
        let mut parts = progress.split('|').map(|part| {
            let part = part.trim();
            let part = if part.is_empty() { "N/A" } else { part };
            part.to_owned()
        });

        let mut next = || parts.next().unwrap_or_else(|| "N/A".to_owned());

        return OutputLine::Progress(DownloadProgress {
            percent: next(),
            speed: next(),
            eta: next(),
        });
    }

    if !line.starts_with('{') {
        return OutputLine::Other;
    }

    match serde_json::from_str(line) {
        Ok(output) => OutputLine::Output(output),
        Err(err) => {
            warn!(err = tracing_err(&err), %line, "yt-dlp printed an unexpected JSON line");
            OutputLine::Other
        }
    }
}

/// yt-dlp prints the progress many times per second. Only the first report
/// and the ones that cross the next tenth of the progress are let through.
#[derive(Default)]
struct ProgressThrottle {
    last_decile: Option<u32>,
}

impl ProgressThrottle {
    fn should_report(&mut self, progress: &DownloadProgress) -> bool {
        let decile = progress
            .percent()
            .map(|percent| (percent.clamp(0.0, 100.0) / 10.0) as u32)
            .unwrap_or_default();

        if self.last_decile.is_some_and(|last| decile <= last) {
            return false;
        }

        self.last_decile = Some(decile);
        true
    }
}

fn progress_text(unit: &WorkUnit, progress: &DownloadProgress) -> String {
    let DownloadProgress {
        percent,
        speed,
        eta,
    } = progress;
    format!(
        "⏳ #{} Downloading... {percent} | Speed: {speed} | ETA: {eta}",
        unit.ordinal
    )
}

impl YtDlpCandidate {
    fn args(&self, unit: &WorkUnit, output_template: &Path) -> Vec<String> {
        let mut args = vec![
            "--newline".to_owned(),
            "--progress".to_owned(),
            "--progress-template".to_owned(),
            format!(
                "download:{PROGRESS_MARKER} %(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s"
            ),
            "--no-simulate".to_owned(),
            "--print".to_owned(),
            "after_move:%(.{title,ext,filepath})j".to_owned(),
            "--output".to_owned(),
            output_template.display().to_string(),
        ];

        if let Some(playlist_end) = self.playlist_end {
            args.extend(["--playlist-end".to_owned(), playlist_end.to_string()]);
        }

        match self.format {
            YtDlpFormat::Video => args.extend([
                "--format".to_owned(),
                "best/bestvideo*+bestaudio".to_owned(),
                "--merge-output-format".to_owned(),
                "mp4".to_owned(),
            ]),
            YtDlpFormat::Audio => {
                args.extend(["--format".to_owned(), "bestaudio/best".to_owned()]);
            }
        }

        args.extend(["--".to_owned(), unit.descriptor.clone()]);
        args
    }

    async fn try_fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> Result<Vec<Artifact>> {
        let stem = unit.file_stem(ctx.attempt);

        // Every entry of a playlist gets its own number after the unique prefix
        let output_template = ctx.workdir.join(format!("{stem}-%(autonumber)02d.%(ext)s"));

        let args = self.args(unit, &output_template);

        let mut declared = vec![];
        let mut throttle = ProgressThrottle::default();

        process::run_streaming(&self.bin, &args, |line| {
            match parse_line(&line) {
                OutputLine::Progress(progress) => {
                    if throttle.should_report(&progress) {
                        ctx.progress.report(progress_text(unit, &progress));
                    }
                }
                OutputLine::Output(output) => declared.push(output),
                OutputLine::Other => trace!(target: "yt_dlp", "{line}"),
            }
            std::future::ready(())
        })
        .await?;

        let mut artifacts = Vec::with_capacity(declared.len());

        for output in declared {
            let Some(artifact) =
                adopt_output(output.filepath, MediaFilter::Any, self.min_size, YT_DLP).await?
            else {
                continue;
            };
            let title = output.title.unwrap_or_else(|| "Unknown".to_owned());
            artifacts.push(artifact.with_title(title));
        }

        Ok(artifacts)
    }
}

#[async_trait]
impl Candidate for YtDlpCandidate {
    fn id(&self) -> &str {
        YT_DLP
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> AttemptOutcome {
        into_outcome(YT_DLP, unit, self.try_fetch(unit, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Category;
    use expect_test::expect;

    fn candidate(format: YtDlpFormat) -> YtDlpCandidate {
        YtDlpCandidate {
            bin: YT_DLP.to_owned(),
            format,
            playlist_end: None,
            timeout: Duration::from_secs(60),
            min_size: 10 * 1024,
        }
    }

    #[test]
    fn progress_lines() {
        let line = "[progress]  45.3%|   1.20MiB/s|00:05";
        assert_eq!(
            parse_line(line),
            OutputLine::Progress(DownloadProgress {
                percent: "45.3%".to_owned(),
                speed: "1.20MiB/s".to_owned(),
                eta: "00:05".to_owned(),
            })
        );

        // Colored output and missing fields
        let line = "\x1b[0;94m[progress] 100.0%\x1b[0m|";
        assert_eq!(
            parse_line(line),
            OutputLine::Progress(DownloadProgress {
                percent: "100.0%".to_owned(),
                speed: "N/A".to_owned(),
                eta: "N/A".to_owned(),
            })
        );
    }

    #[test]
    fn declared_outputs() {
        let line = r#"{"title": "Cat video", "ext": "mp4", "filepath": "/work/u01-a0-01.mp4"}"#;
        assert_eq!(
            parse_line(line),
            OutputLine::Output(DeclaredOutput {
                title: Some("Cat video".to_owned()),
                filepath: "/work/u01-a0-01.mp4".into(),
            })
        );

        assert_eq!(parse_line(r#"{"title": "no path"}"#), OutputLine::Other);
        assert_eq!(
            parse_line("[youtube] abc: Downloading webpage"),
            OutputLine::Other
        );
    }

    #[test]
    fn progress_is_throttled() {
        let mut throttle = ProgressThrottle::default();
        let progress = |percent: &str| DownloadProgress {
            percent: percent.to_owned(),
            speed: "N/A".to_owned(),
            eta: "N/A".to_owned(),
        };

        let percents = [
            "0.1%", "3%", "9.9%", "10.0%", "15%", "42%", "43%", "Unknown", "100%",
        ];
        let reported: Vec<_> = percents
            .into_iter()
            .filter(|percent| throttle.should_report(&progress(percent)))
            .collect();

        assert_eq!(reported, ["0.1%", "10.0%", "42%", "100%"]);
    }

    #[test]
    fn progress_text_format() {
        let unit = WorkUnit::new(2, "https://youtu.be/abc", Category::Media);
        let text = progress_text(
            &unit,
            &DownloadProgress {
                percent: "45.3%".to_owned(),
                speed: "1.20MiB/s".to_owned(),
                eta: "00:05".to_owned(),
            },
        );
        expect!["⏳ #2 Downloading... 45.3% | Speed: 1.20MiB/s | ETA: 00:05"].assert_eq(&text);
    }

    #[test]
    fn command_line() {
        let unit = WorkUnit::new(1, "ytsearch1:lofi beats", Category::Media);
        let args = candidate(YtDlpFormat::Audio).args(
            &unit,
            Path::new("/work/u01-a0-%(autonumber)02d.%(ext)s"),
        );

        assert_eq!(
            args,
            [
                "--newline",
                "--progress",
                "--progress-template",
                "download:[progress] %(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s",
                "--no-simulate",
                "--print",
                "after_move:%(.{title,ext,filepath})j",
                "--output",
                "/work/u01-a0-%(autonumber)02d.%(ext)s",
                "--format",
                "bestaudio/best",
                "--",
                "ytsearch1:lofi beats",
            ]
        );

        let unit = WorkUnit::new(1, "https://youtu.be/abc", Category::Media);
        let args = candidate(YtDlpFormat::Video).args(&unit, Path::new("/work/out"));
        let format = args.iter().position(|arg| arg == "--format").unwrap();
        assert_eq!(args[format + 1], "best/bestvideo*+bestaudio");
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
        assert!(!args.iter().any(|arg| arg == "--playlist-end"));

        let playlist = YtDlpCandidate {
            playlist_end: Some(5),
            ..candidate(YtDlpFormat::Video)
        };
        let args = playlist.args(&unit, Path::new("/work/out"));
        let end = args.iter().position(|arg| arg == "--playlist-end").unwrap();
        assert_eq!(args[end + 1], "5");
    }
}
