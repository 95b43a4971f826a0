use super::{Config, HfClient};
use crate::pipeline::ConcurrencyLimiter;
use crate::prelude::*;
use crate::ErrorKind;
use crate::http::HttpClientError;
use std::fmt;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of image models probed, the rest of them are assumed to behave
/// the same way
const PROBED_IMAGE_MODELS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModelStatus {
    Working,
    ErrorStatus(u16),
    Failed(String),
}

#[derive(Debug, Clone)]
pub(crate) struct ModelProbe {
    pub(crate) model: String,
    pub(crate) status: ModelStatus,
}

#[derive(Debug, Clone)]
pub(crate) struct ModelsReport {
    pub(crate) video: Vec<ModelProbe>,
    pub(crate) image: Vec<ModelProbe>,
}

pub(super) async fn probe_models(
    client: &HfClient,
    limiter: &ConcurrencyLimiter,
    config: &Config,
) -> ModelsReport {
    let mut video = Vec::with_capacity(config.video_models.len());
    for model in &config.video_models {
        video.push(probe_model(client, limiter, model, "cat").await);
    }

    let mut image = Vec::with_capacity(PROBED_IMAGE_MODELS);
    for model in config.image_models.iter().take(PROBED_IMAGE_MODELS) {
        image.push(probe_model(client, limiter, model, "clay cat").await);
    }

    ModelsReport { video, image }
}

#[instrument(skip(client, limiter))]
async fn probe_model(
    client: &HfClient,
    limiter: &ConcurrencyLimiter,
    model: &str,
    prompt: &str,
) -> ModelProbe {
    let status = match limiter.acquire().await {
        Ok(_permit) => {
            let result = tokio::time::timeout(PROBE_TIMEOUT, client.infer(model, prompt)).await;
            match result {
                Ok(Ok(_response)) => ModelStatus::Working,
                Ok(Err(err)) => match err.kind() {
                    ErrorKind::HttpClient {
                        source: HttpClientError::BadResponseStatusCode { status, .. },
                    } => ModelStatus::ErrorStatus(status.as_u16()),
                    _ => ModelStatus::Failed(err.display_chain().to_string()),
                },
                Err(_elapsed) => ModelStatus::Failed(format!("timed out after {PROBE_TIMEOUT:?}")),
            }
        }
        Err(err) => ModelStatus::Failed(err.display_chain().to_string()),
    };

    info!(?status, "Probed the model");

    ModelProbe {
        model: model.to_owned(),
        status,
    }
}

impl fmt::Display for ModelProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = &self.model;
        match &self.status {
            ModelStatus::Working => write!(f, "✅ {model} - WORKING"),
            ModelStatus::ErrorStatus(status) => write!(f, "❌ {model} - Error {status}"),
            ModelStatus::Failed(reason) => {
                write!(f, "❌ {model} - {}", reason.truncate_chars(30))
            }
        }
    }
}

impl fmt::Display for ModelsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "📊 Model Status:\n")?;
        writeln!(f, "🎬 Video Models:")?;
        for probe in &self.video {
            writeln!(f, "{probe}")?;
        }
        writeln!(f, "\n🖼️ Image Models (Fallback):")?;
        for probe in &self.image {
            writeln!(f, "{probe}")?;
        }
        Ok(())
    }
}
