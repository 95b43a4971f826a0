use crate::pipeline::IntakeError;
use url::Url;

/// Social platform the link points to. Only used for user-facing labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub(crate) enum Platform {
    #[strum(serialize = "TIKTOK")]
    TikTok,

    #[strum(serialize = "IG")]
    Instagram,

    #[strum(serialize = "YT")]
    YouTube,

    #[strum(serialize = "X")]
    X,

    #[strum(serialize = "FB")]
    Facebook,

    #[strum(serialize = "REDDIT")]
    Reddit,

    #[strum(serialize = "PINTEREST")]
    Pinterest,

    #[strum(serialize = "GENERAL")]
    General,
}

impl Platform {
    pub(crate) fn detect(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = host.as_str();

        let is = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

        if is("tiktok.com") {
            Self::TikTok
        } else if is("instagram.com") {
            Self::Instagram
        } else if is("youtube.com") || is("youtu.be") {
            Self::YouTube
        } else if is("x.com") || is("twitter.com") {
            Self::X
        } else if is("facebook.com") {
            Self::Facebook
        } else if is("reddit.com") {
            Self::Reddit
        } else if is("pinterest.com") {
            Self::Pinterest
        } else {
            Self::General
        }
    }
}

/// Checks the link against the allow-list of the supported hosts.
/// Look-alike hosts such as `youtube.com.example.org` are rejected.
pub(crate) fn parse_url(raw: &str) -> Result<Url, IntakeError> {
    let raw = raw.trim();

    let allowed = lazy_regex::regex_is_match!(
        r"^https?://(?:www\.|vm\.|vt\.)?(?:youtube\.com|youtu\.be|tiktok\.com|instagram\.com|x\.com|twitter\.com|facebook\.com|reddit\.com|pinterest\.com)(?:[/?#]|$)"i,
        raw
    );

    if !allowed {
        return Err(invalid(raw));
    }

    Url::parse(raw).map_err(|_| invalid(raw))
}

fn invalid(raw: &str) -> IntakeError {
    IntakeError::InvalidUrl {
        url: raw.to_owned(),
    }
}

/// TikTok photo posts are served by the gallery downloader first
pub(crate) fn is_photo_post(url: &Url) -> bool {
    Platform::detect(url) == Platform::TikTok && url.path().contains("/photo/")
}
