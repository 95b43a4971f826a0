//! Client of the hosted inference API that generates the claymation scenes

mod candidate;
mod probe;

use crate::pipeline::{Candidate, ConcurrencyLimiter, Strategy};
use crate::prelude::*;
use crate::{http, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub(crate) use candidate::*;
pub(crate) use probe::*;

#[derive(Clone, Deserialize)]
pub(crate) struct Config {
    api_key: String,

    #[serde(default = "default_api_url")]
    api_url: Url,

    /// Text-to-video models, tried before the image ones
    #[serde(default = "default_video_models")]
    video_models: Vec<String>,

    /// Text-to-image models, the image is turned into a slideshow clip
    #[serde(default = "default_image_models")]
    image_models: Vec<String>,

    #[serde(default = "default_video_timeout_secs")]
    video_timeout_secs: u64,

    #[serde(default = "default_image_timeout_secs")]
    image_timeout_secs: u64,

    /// The API rate-limits aggressively, so the calls are serialized by default
    #[serde(default = "default_concurrency")]
    concurrency: usize,
}

fn default_api_url() -> Url {
    Url::parse("https://api-inference.huggingface.co/models/")
        .unwrap_or_else(|err| panic!("BUG: invalid default API URL: {err}"))
}

fn default_video_models() -> Vec<String> {
    vec!["damo-vilab/modelscope-text-to-video-synthesis".to_owned()]
}

fn default_image_models() -> Vec<String> {
    [
        "stabilityai/stable-diffusion-2-1",
        "runwayml/stable-diffusion-v1-5",
        "CompVis/stable-diffusion-v1-4",
    ]
    .map(ToOwned::to_owned)
    .to_vec()
}

fn default_video_timeout_secs() -> u64 {
    120
}

fn default_image_timeout_secs() -> u64 {
    60
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HfError {
    #[error("Model {model} responded with an unexpected payload: {reason}")]
    UnexpectedPayload { model: String, reason: String },

    #[error("Model {model} returned a malformed base64 image")]
    Base64 {
        model: String,
        source: base64::DecodeError,
    },

    #[error("Model {model} produced only {size} bytes of media (at least {min_size} expected)")]
    UndersizedMedia {
        model: String,
        size: u64,
        min_size: u64,
    },
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

pub(crate) struct HfClient {
    http: http::Client,
    api_url: Url,
    api_key: String,
}

impl HfClient {
    fn new(http: http::Client, config: &Config) -> Self {
        let mut api_url = config.api_url.clone();

        // Model ids contain slashes, so they are appended to the base path
        if !api_url.path().ends_with('/') {
            api_url.set_path(&format!("{}/", api_url.path()));
        }

        Self {
            http,
            api_url,
            api_key: config.api_key.clone(),
        }
    }

    fn model_url(&self, model: &str) -> Result<Url> {
        self.api_url
            .join(model)
            .fatal_ctx(|| format!("Invalid model id: {model}"))
    }

    /// Submits the prompt to the model. Error statuses are returned as errors.
    #[instrument(skip(self))]
    pub(crate) async fn infer(&self, model: &str, prompt: &str) -> Result<reqwest::Response> {
        self.http
            .post(self.model_url(model)?)
            .bearer_auth(&self.api_key)
            .json(&InferenceRequest { inputs: prompt })
            .try_send()
            .await
    }

    pub(crate) async fn download(&self, url: Url) -> Result<bytes::Bytes> {
        self.http.get(url).read_bytes().await
    }
}

/// Everything needed to build the scene strategies and to probe the models
pub(crate) struct HfService {
    client: Arc<HfClient>,
    config: Config,
    limiter: ConcurrencyLimiter,
}

/// Prompt builders for the kinds of models
#[derive(Clone, Copy)]
pub(crate) struct Prompts {
    pub(crate) video: fn(&str) -> String,
    pub(crate) image: fn(&str) -> String,
}

impl HfService {
    pub(crate) fn new(http: http::Client, config: Config) -> Self {
        Self {
            client: Arc::new(HfClient::new(http, &config)),
            limiter: ConcurrencyLimiter::new("hf", config.concurrency),
            config,
        }
    }

    /// Video models first, then the image models, all of them sharing the
    /// single limiter of the API.
    pub(crate) fn scene_strategy(&self, prompts: Prompts, min_output_bytes: u64) -> Strategy {
        let video = self.config.video_models.iter().map(|model| {
            Arc::new(VideoModelCandidate {
                client: self.client.clone(),
                model: model.clone(),
                prompt: prompts.video,
                timeout: Duration::from_secs(self.config.video_timeout_secs),
                min_size: min_output_bytes,
            }) as Arc<dyn Candidate>
        });

        let image = self.config.image_models.iter().map(|model| {
            Arc::new(ImageModelCandidate {
                client: self.client.clone(),
                model: model.clone(),
                prompt: prompts.image,
                timeout: Duration::from_secs(self.config.image_timeout_secs),
            }) as Arc<dyn Candidate>
        });

        Strategy::new(self.limiter.clone(), video.chain(image).collect())
    }

    pub(crate) async fn probe_models(&self) -> ModelsReport {
        probe::probe_models(&self.client, &self.limiter, &self.config).await
    }
}
