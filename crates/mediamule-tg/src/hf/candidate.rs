use super::{HfClient, HfError};
use crate::http::{parse_json, HttpClientError};
use crate::pipeline::{Artifact, AttemptCtx, AttemptOutcome, Candidate, MediaKind, WorkUnit};
use crate::prelude::*;
use crate::{err, Error, ErrorKind, Result};
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Text-to-video model. It responds with a JSON list, where the first
/// element references the produced clip by URL.
pub(crate) struct VideoModelCandidate {
    pub(super) client: Arc<HfClient>,
    pub(super) model: String,
    pub(super) prompt: fn(&str) -> String,
    pub(super) timeout: Duration,
    pub(super) min_size: u64,
}

/// Text-to-image model. It responds either with the image bytes directly
/// or with a JSON list, where the first element is a base64 image.
pub(crate) struct ImageModelCandidate {
    pub(super) client: Arc<HfClient>,
    pub(super) model: String,
    pub(super) prompt: fn(&str) -> String,
    pub(super) timeout: Duration,
}

#[async_trait]
impl Candidate for VideoModelCandidate {
    fn id(&self) -> &str {
        &self.model
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> AttemptOutcome {
        into_outcome(self.try_fetch(unit, ctx).await)
    }
}

impl VideoModelCandidate {
    async fn try_fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> Result<Artifact> {
        let prompt = (self.prompt)(&unit.descriptor);

        debug!(%prompt, "Generating the scene video");

        let bytes = self
            .client
            .infer(&self.model, &prompt)
            .await?
            .read_bytes()
            .await?;

        let url = parse_video_payload(&self.model, &bytes)?;

        let video = self.client.download(url).await?;

        let size = video.len() as u64;
        if size < self.min_size {
            return Err(err!(HfError::UndersizedMedia {
                model: self.model.clone(),
                size,
                min_size: self.min_size,
            }));
        }

        Ok(
            Artifact::write(ctx.output_path(unit, "mp4"), &video, MediaKind::Video, self.model.as_str())
                .await?
                .with_title(unit.descriptor.clone()),
        )
    }
}

#[async_trait]
impl Candidate for ImageModelCandidate {
    fn id(&self) -> &str {
        &self.model
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> AttemptOutcome {
        into_outcome(self.try_fetch(unit, ctx).await)
    }
}

impl ImageModelCandidate {
    async fn try_fetch(&self, unit: &WorkUnit, ctx: &AttemptCtx<'_>) -> Result<Artifact> {
        let prompt = (self.prompt)(&unit.descriptor);

        debug!(%prompt, "Generating the scene image");

        let response = self.client.infer(&self.model, &prompt).await?;
        let content_type = response.content_type().map(ToOwned::to_owned);
        let bytes = response.read_bytes().await?;

        let image = decode_image_payload(&self.model, content_type.as_deref(), &bytes)?;

        Ok(Artifact::write(
            ctx.output_path(unit, image.extension),
            &image.bytes,
            MediaKind::Image,
            self.model.as_str(),
        )
        .await?
        .with_title(unit.descriptor.clone()))
    }
}

/// Rejections of the request itself (bad token, unknown model) won't go away
/// by retrying. Everything else is worth trying the next candidate.
fn into_outcome(result: Result<Artifact>) -> AttemptOutcome {
    let err = match result {
        Ok(artifact) => return AttemptOutcome::Success(vec![artifact]),
        Err(err) => err,
    };

    if is_fatal(&err) {
        AttemptOutcome::Fatal(err)
    } else {
        AttemptOutcome::Retryable(err)
    }
}

fn is_fatal(err: &Error) -> bool {
    match err.kind() {
        ErrorKind::HttpClient { source } => {
            matches!(source, HttpClientError::BadResponseStatusCode { .. }) && !source.is_transient()
        }
        ErrorKind::Io { .. } | ErrorKind::Fatal { .. } => true,
        _ => false,
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct DecodedImage {
    pub(crate) bytes: Vec<u8>,
    pub(crate) extension: &'static str,
}

fn unexpected(model: &str, reason: impl Into<String>) -> Error {
    let reason: String = reason.into();
    err!(HfError::UnexpectedPayload { model, reason })
}

/// Binary images are used as is, JSON payloads must carry a single base64
/// string as the first element of a list.
pub(crate) fn decode_image_payload(
    model: &str,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<DecodedImage> {
    if let Some(content_type) = content_type.filter(|ty| ty.trim_start().starts_with("image/")) {
        return Ok(DecodedImage {
            bytes: bytes.to_vec(),
            extension: image_extension(content_type),
        });
    }

    let payload: serde_json::Value = parse_json(bytes)?;

    let Some(serde_json::Value::String(encoded)) = payload.as_array().and_then(|list| list.first())
    else {
        return Err(unexpected(
            model,
            "expected a list with a base64 string as the first element",
        ));
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|source| {
            err!(HfError::Base64 {
                model,
                source,
            })
        })?;

    Ok(DecodedImage {
        bytes,
        extension: "png",
    })
}

/// Extracts the URL of the clip from the response of a video model
pub(crate) fn parse_video_payload(model: &str, bytes: &[u8]) -> Result<Url> {
    let payload: serde_json::Value = parse_json(bytes)?;

    let url = payload
        .as_array()
        .and_then(|list| list.first())
        .and_then(|first| first.get("url"))
        .and_then(|url| url.as_str())
        .ok_or_else(|| {
            unexpected(
                model,
                "expected a list with an object that has a `url` as the first element",
            )
        })?;

    Url::parse(url).map_err(|err| unexpected(model, format!("invalid video URL {url:?}: {err}")))
}

fn image_extension(content_type: &str) -> &'static str {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}
