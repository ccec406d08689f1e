//! Lifecycle sink that publishes events on a channel.
//!
//! The translator leaves some values to the sink: `on_done` carries no file
//! name or duration, and a resync only says "restore if needed". This
//! adapter tracks the current print to fill those in, and latches the
//! height milestone so it fires once per print.

use parking_lot::Mutex;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::printer::PrintState;
use crate::ports::LifecycleSink;

/// One translated print lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// `restored` is set when a print already running was picked up on
    /// (re)connect instead of being seen to start.
    Started { file_name: String, restored: bool },
    Paused { file_name: Option<String> },
    Resumed { file_name: Option<String> },
    Progress { percent: f64 },
    /// First layer done. At most once per print.
    HeightMilestone,
    Done {
        file_name: Option<String>,
        duration_secs: Option<f64>,
    },
    Failed {
        file_name: String,
        duration_secs: String,
        reason: String,
    },
    Error { message: String },
}

#[derive(Debug, Default)]
struct PrintTracker {
    active: bool,
    file_name: Option<String>,
    tracked_since: Option<Instant>,
    /// Duration already elapsed when tracking began (restored prints)
    prior_secs: f64,
    milestone_fired: bool,
}

impl PrintTracker {
    fn begin(&mut self, file_name: Option<String>, prior_secs: f64) {
        *self = Self {
            active: true,
            file_name,
            tracked_since: Some(Instant::now()),
            prior_secs,
            milestone_fired: false,
        };
    }

    fn duration_secs(&self) -> Option<f64> {
        self.tracked_since
            .map(|since| self.prior_secs + since.elapsed().as_secs_f64())
    }
}

/// Publishes every callback as a [`LifecycleEvent`]. Never blocks.
pub struct EventChannelSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
    tracker: Mutex<PrintTracker>,
}

impl EventChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                tracker: Mutex::new(PrintTracker::default()),
            },
            rx,
        )
    }

    /// File name of the print being tracked, if any.
    pub fn tracked_file(&self) -> Option<String> {
        let tracker = self.tracker.lock();
        tracker.active.then(|| tracker.file_name.clone()).flatten()
    }

    fn publish(&self, event: LifecycleEvent) {
        if self.tx.send(event).is_err() {
            debug!("Lifecycle event dropped, no receiver");
        }
    }
}

impl LifecycleSink for EventChannelSink {
    fn on_started(&self, file_name: &str) {
        self.tracker.lock().begin(Some(file_name.to_string()), 0.0);
        self.publish(LifecycleEvent::Started {
            file_name: file_name.to_string(),
            restored: false,
        });
    }

    fn on_paused(&self, file_name: Option<&str>) {
        let file_name = file_name
            .map(str::to_string)
            .or_else(|| self.tracked_file());
        self.publish(LifecycleEvent::Paused { file_name });
    }

    fn on_resumed(&self, file_name: Option<&str>) {
        let file_name = file_name
            .map(str::to_string)
            .or_else(|| self.tracked_file());
        self.publish(LifecycleEvent::Resumed { file_name });
    }

    fn on_progress(&self, percent: f64) {
        self.publish(LifecycleEvent::Progress { percent });
    }

    fn on_height_milestone(&self) {
        {
            let mut tracker = self.tracker.lock();
            if tracker.milestone_fired {
                return;
            }
            tracker.milestone_fired = true;
        }
        self.publish(LifecycleEvent::HeightMilestone);
    }

    fn on_done(&self, file_name: Option<&str>, duration_secs: Option<f64>) {
        let (tracked_file, tracked_duration) = {
            let mut tracker = self.tracker.lock();
            let retained = (tracker.file_name.take(), tracker.duration_secs());
            tracker.active = false;
            tracker.tracked_since = None;
            retained
        };
        self.publish(LifecycleEvent::Done {
            file_name: file_name.map(str::to_string).or(tracked_file),
            duration_secs: duration_secs.or(tracked_duration),
        });
    }

    fn on_failed(&self, file_name: &str, duration_secs: &str, reason: &str) {
        {
            let mut tracker = self.tracker.lock();
            tracker.active = false;
            tracker.tracked_since = None;
        }
        self.publish(LifecycleEvent::Failed {
            file_name: file_name.to_string(),
            duration_secs: duration_secs.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_error(&self, message: &str) {
        self.publish(LifecycleEvent::Error {
            message: message.to_string(),
        });
    }

    fn on_restore_if_needed(
        &self,
        state: &PrintState,
        file_name: Option<&str>,
        total_duration_secs: Option<f64>,
    ) {
        let restored_file = {
            let mut tracker = self.tracker.lock();
            if !state.is_active() {
                if tracker.active {
                    info!(%state, "Tracked print is no longer running");
                }
                tracker.active = false;
                return;
            }
            if tracker.active {
                return;
            }
            tracker.begin(
                file_name.map(str::to_string),
                total_duration_secs.unwrap_or(0.0),
            );
            file_name.unwrap_or_default().to_string()
        };

        info!(%state, file_name = %restored_file, "Restoring print already in progress");
        self.publish(LifecycleEvent::Started {
            file_name: restored_file,
            restored: true,
        });
    }
}
