use super::GLOBAL_LABELS;
use crate::util::units::{KB, MB};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::Deserialize;

/// Histogram buckets to measure the distribution of durations in seconds
pub(crate) const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

const KB_F: f64 = KB as f64;
const MB_F: f64 = MB as f64;

pub(crate) const DEFAULT_BLOB_SIZE_BUCKETS: &[f64] = &[
    KB_F * 16.,
    KB_F * 64.,
    KB_F * 256.,
    MB_F * 1.,
    MB_F * 4.,
    MB_F * 10.,
    MB_F * 20.,
    MB_F * 50.,
    MB_F * 100.,
];

#[derive(Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_port")]
    pub(crate) port: u16,
}

fn default_port() -> u16 {
    2000
}

pub fn init_metrics(config: &MetricsConfig) {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_owned()),
            DEFAULT_DURATION_BUCKETS,
        )
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Suffix("_bytes".to_owned()),
                DEFAULT_BLOB_SIZE_BUCKETS,
            )
        })
        .unwrap_or_else(|err| panic!("BUG: invalid histogram buckets: {err:#?}"));

    for (key, value) in GLOBAL_LABELS {
        builder = builder.add_global_label(*key, *value);
    }

    builder
        .install()
        .expect("BUG: failed to initialize the metrics listener");

    describe_metrics();
}

fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    describe_counter!(
        "tg_updates_total",
        "Number of updates received from Telegram"
    );
    describe_counter!(
        "tg_updates_skipped_total",
        "Number of updates received from Telegram that were skipped by the bot"
    );
    describe_counter!(
        "acquisition_attempts_total",
        "Number of acquisition attempts per candidate and outcome"
    );
    describe_gauge!(
        "acquisitions_in_flight",
        "Number of acquisition attempts that currently hold a concurrency slot"
    );
    describe_histogram!(
        "acquired_artifact_bytes",
        Unit::Bytes,
        "Size of the artifacts produced by successful acquisitions"
    );
    describe_histogram!(
        "encoder_duration_seconds",
        Unit::Seconds,
        "Duration of a single invocation of the encoder per mode"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "Duration of a single real HTTP request, retries are separate observations"
    );
    describe_histogram!(
        "http_request_effective_duration_seconds",
        Unit::Seconds,
        "Duration of an HTTP request including all of its retries"
    );
    describe_counter!(
        "delivered_files_total",
        "Number of files sent to chats per send method"
    );
    describe_counter!("jobs_total", "Number of finished jobs per outcome");
}
