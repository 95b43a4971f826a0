use crate::{download, hf, pipeline, tg, MetricsConfig};
use serde::de::DeserializeOwned;

pub struct Config {
    pub(crate) tg: tg::Config,
    pub(crate) hf: hf::Config,
    pub(crate) download: download::Config,
    pub(crate) pipeline: pipeline::Config,
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn load_or_panic() -> Config {
        Self {
            tg: from_env_or_panic("TG_"),
            hf: from_env_or_panic("HF_"),
            download: from_env_or_panic("DOWNLOADER_"),
            pipeline: from_env_or_panic("PIPELINE_"),
            metrics: from_env_or_panic("METRICS_"),
        }
    }
}

pub(crate) fn from_env_or_panic<T: DeserializeOwned>(prefix: &str) -> T {
    envy::prefixed(prefix).from_env().unwrap_or_else(|err| {
        panic!(
            "BUG: Couldn't load config from environment for {}: {:#?}",
            std::any::type_name::<T>(),
            err
        );
    })
}
