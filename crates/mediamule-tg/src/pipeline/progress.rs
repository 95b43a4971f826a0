use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// User-visible surface that shows the single status text of a job,
/// e.g. an editable chat message.
#[async_trait]
pub(crate) trait StatusSink: Send + Sync + 'static {
    async fn show(&self, text: &str) -> Result;
}

/// Coalescing writer of the job's status slot.
///
/// At most one delivery to the [`StatusSink`] is in flight at a time. Reports
/// that arrive meanwhile overwrite each other, and only the latest one is
/// delivered once the sink is free. The terminal report from
/// [`ProgressReporter::finish`] is always delivered.
#[derive(Clone)]
pub(crate) struct ProgressReporter {
    imp: Arc<ReporterImp>,
}

struct ReporterImp {
    sink: Box<dyn StatusSink>,
    slot: Mutex<StatusSlot>,
}

#[derive(Default)]
struct StatusSlot {
    /// Latest text that wasn't delivered yet
    pending: Option<String>,

    /// Last text that the sink accepted
    shown: Option<String>,

    /// Set while the delivery task drains the pending texts
    draining: bool,
    in_flight: Option<JoinHandle<()>>,
    finished: bool,
}

impl ProgressReporter {
    pub(crate) fn new(sink: impl StatusSink) -> Self {
        Self {
            imp: Arc::new(ReporterImp {
                sink: Box::new(sink),
                slot: Default::default(),
            }),
        }
    }

    /// Records the new status text. Never waits for the delivery.
    pub(crate) fn report(&self, text: impl Into<String>) {
        let mut slot = self.imp.slot.lock();
        if slot.finished {
            return;
        }

        slot.pending = Some(text.into());

        if slot.draining {
            return;
        }

        slot.draining = true;

        let imp = self.imp.clone();
        slot.in_flight = Some(tokio::spawn(async move { imp.drain().await }));
    }

    /// Delivers the terminal status text. Waits for the in-flight delivery
    /// to finish first, so that it doesn't overwrite the terminal text.
    pub(crate) async fn finish(&self, text: impl Into<String>) {
        let in_flight = {
            let mut slot = self.imp.slot.lock();
            slot.finished = true;
            slot.pending = None;
            slot.in_flight.take()
        };

        if let Some(task) = in_flight {
            if let Err(err) = task.await {
                warn!(err = tracing_err(&err), "Progress delivery task failed");
            }
        }

        self.imp.deliver(text.into()).await;
    }
}

impl ReporterImp {
    async fn drain(&self) {
        loop {
            let text = {
                let mut slot = self.slot.lock();
                match slot.pending.take() {
                    Some(text) if !slot.finished => text,
                    _ => {
                        slot.draining = false;
                        return;
                    }
                }
            };
            self.deliver(text).await;
        }
    }

    /// Only one delivery runs at a time, so `shown` can't change while
    /// the sink is busy.
    async fn deliver(&self, text: String) {
        if self.slot.lock().shown.as_deref() == Some(text.as_str()) {
            return;
        }

        if let Err(err) = self.sink.show(&text).await {
            warn!(
                err = tracing_err(&err),
                %text,
                "Failed to deliver the status update"
            );
            return;
        }

        self.slot.lock().shown = Some(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingSink {
        shown: Arc<Mutex<Vec<String>>>,

        /// Number of the next deliveries that fail
        failures: Arc<Mutex<usize>>,
    }

    impl RecordingSink {
        fn failing(failures: usize) -> Self {
            Self {
                failures: Arc::new(Mutex::new(failures)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn show(&self, text: &str) -> Result {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.shown.lock().push(text.to_owned());

            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(fatal!("network is down"));
            }
            Ok(())
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn coalesces_reports_while_delivery_is_in_flight() {
        let sink = RecordingSink::default();
        let reporter = ProgressReporter::new(sink.clone());

        for i in 0..10 {
            reporter.report(format!("progress {i}"));
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        // All of the reports collapsed into the latest one
        assert_eq!(*sink.shown.lock(), ["progress 9"]);

        reporter.report("progress 10");
        tokio::time::sleep(Duration::from_millis(10)).await;

        // This one is overwritten while "progress 10" is in flight
        reporter.report("progress 11");
        reporter.report("progress 12");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            *sink.shown.lock(),
            ["progress 9", "progress 10", "progress 12"]
        );

        reporter.finish("done").await;
        assert_eq!(
            *sink.shown.lock(),
            ["progress 9", "progress 10", "progress 12", "done"]
        );
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn terminal_report_is_always_delivered_last() {
        let sink = RecordingSink::default();
        let reporter = ProgressReporter::new(sink.clone());

        reporter.report("progress 1");
        reporter.report("progress 2");
        reporter.finish("done").await;

        // Reports after the terminal one are ignored
        reporter.report("too late");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let shown = sink.shown.lock().clone();
        assert_eq!(shown.last().map(String::as_str), Some("done"));
        assert!(!shown.iter().any(|text| text == "too late"));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn delivery_failures_are_swallowed() {
        let sink = RecordingSink::failing(usize::MAX);
        let reporter = ProgressReporter::new(sink.clone());

        reporter.report("progress");
        tokio::time::sleep(Duration::from_secs(1)).await;
        reporter.finish("done").await;

        assert_eq!(*sink.shown.lock(), ["progress", "done"]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn same_text_is_not_delivered_twice() {
        let sink = RecordingSink::default();
        let reporter = ProgressReporter::new(sink.clone());

        reporter.report("same");
        tokio::time::sleep(Duration::from_secs(1)).await;
        reporter.report("same");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*sink.shown.lock(), ["same"]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn failed_delivery_is_not_deduplicated() {
        let sink = RecordingSink::failing(1);
        let reporter = ProgressReporter::new(sink.clone());

        reporter.report("done");
        tokio::time::sleep(Duration::from_secs(1)).await;

        // The first attempt failed, so the same terminal text goes again
        reporter.finish("done").await;

        assert_eq!(*sink.shown.lock(), ["done", "done"]);
        assert_eq!(*sink.failures.lock(), 0);
    }
}
