//! Sinks that receive indexing events
//!
//! A listener is a value handed to the run call; there is no global registry.

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::error::{IndexError, IndexErrorKind};
use crate::models::{FileIndexedEvent, IndexStats, Volume};

/// Receives progress and results of an indexing run.
///
/// All methods default to no-ops.
pub trait IndexListener {
    fn on_start(&mut self, _volume: &Volume) {}

    /// A file produced NEW_PHOTO, NEW_INSTANCE or NOT_IMAGE
    fn on_file_indexed(&mut self, _event: &FileIndexedEvent) {}

    /// Percent complete, non-decreasing within a run
    fn on_progress(&mut self, _percent: f64) {}

    fn on_complete(&mut self, _stats: &IndexStats) {}

    /// The run aborted; no completion will follow
    fn on_error(&mut self, _message: &str) {}

    fn on_cancelled(&mut self, _stats: &IndexStats) {}
}

impl<L: IndexListener + ?Sized> IndexListener for Box<L> {
    fn on_start(&mut self, volume: &Volume) {
        (**self).on_start(volume);
    }

    fn on_file_indexed(&mut self, event: &FileIndexedEvent) {
        (**self).on_file_indexed(event);
    }

    fn on_progress(&mut self, percent: f64) {
        (**self).on_progress(percent);
    }

    fn on_complete(&mut self, stats: &IndexStats) {
        (**self).on_complete(stats);
    }

    fn on_error(&mut self, message: &str) {
        (**self).on_error(message);
    }

    fn on_cancelled(&mut self, stats: &IndexStats) {
        (**self).on_cancelled(stats);
    }
}

/// Listener that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullListener;

impl IndexListener for NullListener {}

/// Owned form of every listener callback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IndexEvent {
    Started { volume: String },
    FileIndexed(FileIndexedEvent),
    Progress { percent: f64 },
    Completed(IndexStats),
    Failed { message: String },
    Cancelled(IndexStats),
}

impl IndexEvent {
    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IndexEvent::Completed(_) | IndexEvent::Failed { .. } | IndexEvent::Cancelled(_)
        )
    }

    /// Result of the run for a terminal event, `None` otherwise
    pub fn into_result(self) -> Option<Result<IndexStats, IndexError>> {
        match self {
            IndexEvent::Completed(stats) => Some(Ok(stats)),
            IndexEvent::Failed { message } => {
                Some(Err(IndexError::new(IndexErrorKind::Walk, None, message)))
            }
            IndexEvent::Cancelled(_) => Some(Err(IndexError::cancelled())),
            _ => None,
        }
    }
}

/// Recording listener, mostly for tests and batch callers
impl IndexListener for Vec<IndexEvent> {
    fn on_start(&mut self, volume: &Volume) {
        self.push(IndexEvent::Started {
            volume: volume.name.clone(),
        });
    }

    fn on_file_indexed(&mut self, event: &FileIndexedEvent) {
        self.push(IndexEvent::FileIndexed(event.clone()));
    }

    fn on_progress(&mut self, percent: f64) {
        self.push(IndexEvent::Progress { percent });
    }

    fn on_complete(&mut self, stats: &IndexStats) {
        self.push(IndexEvent::Completed(stats.clone()));
    }

    fn on_error(&mut self, message: &str) {
        self.push(IndexEvent::Failed {
            message: message.to_string(),
        });
    }

    fn on_cancelled(&mut self, stats: &IndexStats) {
        self.push(IndexEvent::Cancelled(stats.clone()));
    }
}

/// Forwards events over a channel, e.g. from a background runner to a UI thread.
///
/// A disconnected receiver is not an error; events are dropped.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: Sender<IndexEvent>,
}

impl ChannelListener {
    pub fn new(tx: Sender<IndexEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: IndexEvent) {
        let _ = self.tx.send(event);
    }
}

impl IndexListener for ChannelListener {
    fn on_start(&mut self, volume: &Volume) {
        self.send(IndexEvent::Started {
            volume: volume.name.clone(),
        });
    }

    fn on_file_indexed(&mut self, event: &FileIndexedEvent) {
        self.send(IndexEvent::FileIndexed(event.clone()));
    }

    fn on_progress(&mut self, percent: f64) {
        self.send(IndexEvent::Progress { percent });
    }

    fn on_complete(&mut self, stats: &IndexStats) {
        self.send(IndexEvent::Completed(stats.clone()));
    }

    fn on_error(&mut self, message: &str) {
        self.send(IndexEvent::Failed {
            message: message.to_string(),
        });
    }

    fn on_cancelled(&mut self, stats: &IndexStats) {
        self.send(IndexEvent::Cancelled(stats.clone()));
    }
}

/// Fans every event out to two listeners
pub struct Tee<A, B>(pub A, pub B);

impl<A: IndexListener, B: IndexListener> IndexListener for Tee<A, B> {
    fn on_start(&mut self, volume: &Volume) {
        self.0.on_start(volume);
        self.1.on_start(volume);
    }

    fn on_file_indexed(&mut self, event: &FileIndexedEvent) {
        self.0.on_file_indexed(event);
        self.1.on_file_indexed(event);
    }

    fn on_progress(&mut self, percent: f64) {
        self.0.on_progress(percent);
        self.1.on_progress(percent);
    }

    fn on_complete(&mut self, stats: &IndexStats) {
        self.0.on_complete(stats);
        self.1.on_complete(stats);
    }

    fn on_error(&mut self, message: &str) {
        self.0.on_error(message);
        self.1.on_error(message);
    }

    fn on_cancelled(&mut self, stats: &IndexStats) {
        self.0.on_cancelled(stats);
        self.1.on_cancelled(stats);
    }
}
