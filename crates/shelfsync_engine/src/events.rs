//! Sync lifecycle events.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shelfsync_protocol::{ConflictRecord, ItemId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

/// Something a UI or log bridge may want to know about a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A cycle acquired the lock and began.
    Started,
    /// Work advanced.
    Progress {
        /// Completion in percent.
        percent: u8,
        /// Units of work finished.
        completed: usize,
        /// Units of work in this cycle.
        total: usize,
        /// Item just processed.
        current_item: Option<ItemId>,
    },
    /// The cycle finished.
    Completed {
        /// Entries propagated.
        uploaded: usize,
        /// Remote changes applied.
        downloaded: usize,
        /// Wall time.
        duration: Duration,
    },
    /// The cycle aborted.
    Failed {
        /// Stable error code.
        error_code: String,
        /// Whether retrying may help.
        retryable: bool,
        /// Suggested wait before retrying.
        retry_after_seconds: Option<u64>,
    },
    /// Conflicts were resolved.
    ConflictDetected {
        /// Records produced.
        conflicts: Vec<ConflictRecord>,
        /// Policy that decided them.
        resolution_policy: String,
    },
}

/// Receives engine events.
///
/// Called from the thread running the cycle and, for progress, from upload
/// workers. Implementations must not block for long.
pub trait SyncEventSink: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &SyncEvent);
}

impl<F> SyncEventSink for F
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: &SyncEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl SyncEventSink for NoopEventSink {
    fn on_event(&self, _event: &SyncEvent) {}
}

/// Keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingEventSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events and forgets them.
    pub fn take(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Returns true if any recorded event matches.
    pub fn any(&self, predicate: impl Fn(&SyncEvent) -> bool) -> bool {
        self.events.lock().iter().any(predicate)
    }
}

impl SyncEventSink for RecordingEventSink {
    fn on_event(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events over a channel.
///
/// Send failures (receiver dropped) are ignored.
#[derive(Debug)]
pub struct ChannelEventSink {
    sender: Mutex<mpsc::Sender<SyncEvent>>,
}

impl ChannelEventSink {
    /// Creates a sink and its receiving end.
    pub fn channel() -> (Self, mpsc::Receiver<SyncEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self::new(sender), receiver)
    }

    /// Wraps an existing sender.
    pub fn new(sender: mpsc::Sender<SyncEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl SyncEventSink for ChannelEventSink {
    fn on_event(&self, event: &SyncEvent) {
        let _ = self.sender.lock().send(event.clone());
    }
}

/// Emits progress events at a fixed percentage granularity.
pub(crate) struct ProgressTracker<'a> {
    sink: &'a dyn SyncEventSink,
    total: usize,
    step: usize,
    completed: AtomicUsize,
    last_bucket: Mutex<usize>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn SyncEventSink, total: usize, step: u8) -> Self {
        Self {
            sink,
            total,
            step: usize::from(step.max(1)),
            completed: AtomicUsize::new(0),
            last_bucket: Mutex::new(0),
        }
    }

    /// Records one finished unit of work.
    pub fn advance(&self, current_item: Option<&ItemId>) {
        if self.total == 0 {
            return;
        }
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let percent = (completed.min(self.total) * 100 / self.total).min(100);
        let bucket = percent / self.step;

        let mut last = self.last_bucket.lock();
        if bucket > *last || completed == self.total {
            *last = bucket.max(*last);
            self.sink.on_event(&SyncEvent::Progress {
                percent: u8::try_from(percent).unwrap_or(100),
                completed,
                total: self.total,
                current_item: current_item.cloned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_percents(events: &[SyncEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn recording_sink_collects() {
        let sink = RecordingEventSink::new();
        sink.on_event(&SyncEvent::Started);
        sink.on_event(&SyncEvent::Completed {
            uploaded: 1,
            downloaded: 0,
            duration: Duration::from_millis(5),
        });

        assert_eq!(sink.events().len(), 2);
        assert!(sink.any(|e| matches!(e, SyncEvent::Started)));
        assert_eq!(sink.take().len(), 2);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn channel_sink_forwards() {
        let (sink, rx) = ChannelEventSink::channel();
        sink.on_event(&SyncEvent::Started);
        assert_eq!(rx.recv().unwrap(), SyncEvent::Started);

        drop(rx);
        sink.on_event(&SyncEvent::Started);
    }

    #[test]
    fn closures_are_sinks() {
        let count = AtomicUsize::new(0);
        let sink = |_: &SyncEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        sink.on_event(&SyncEvent::Started);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn progress_is_throttled_to_step() {
        let sink = RecordingEventSink::new();
        let tracker = ProgressTracker::new(&sink, 100, 25);
        for _ in 0..100 {
            tracker.advance(None);
        }
        assert_eq!(progress_percents(&sink.events()), [25, 50, 75, 100]);
    }

    #[test]
    fn progress_small_totals_report_each_step() {
        let sink = RecordingEventSink::new();
        let tracker = ProgressTracker::new(&sink, 3, 10);
        let item = ItemId::from("a");
        for _ in 0..3 {
            tracker.advance(Some(&item));
        }

        assert_eq!(progress_percents(&sink.events()), [33, 66, 100]);
        assert!(matches!(
            sink.events().last(),
            Some(SyncEvent::Progress { completed: 3, total: 3, current_item: Some(_), .. })
        ));
    }

    #[test]
    fn progress_with_no_work_is_silent() {
        let sink = RecordingEventSink::new();
        ProgressTracker::new(&sink, 0, 10).advance(None);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn event_json_shape() {
        let json = serde_json::to_value(SyncEvent::Failed {
            error_code: "network".into(),
            retryable: true,
            retry_after_seconds: Some(30),
        })
        .unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["retry_after_seconds"], 30);
    }
}
