//! JSON-lines progress reporting
//!
//! Writes one JSON object per line (stderr by default) so a wrapping process
//! can follow an indexing run. Every message carries `_t` (type), `seq` and
//! `ts` (milliseconds since the reporter was created).

use serde::Serialize;
use std::io::{Stderr, Write};
use std::time::Instant;

use crate::listener::IndexListener;
use crate::models::{FileIndexedEvent, IndexOutcome, IndexStats, Volume};

/// Start message sent when a run begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub volume: String,
    pub base_path: String,
}

/// Progress message, throttled by the reporting interval
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Percent complete
    pub pct: f64,
    /// New photos so far
    #[serde(rename = "np")]
    pub new_photos: u64,
    /// New instances so far
    #[serde(rename = "ni")]
    pub new_instances: u64,
    /// Non-image files so far
    #[serde(rename = "nx")]
    pub not_images: u64,
}

/// Per-file message, only written when file reporting is enabled
#[derive(Debug, Clone, Serialize)]
pub struct FileMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub path: String,
    pub outcome: IndexOutcome,
}

/// Error message sent when the run aborts
#[derive(Debug, Clone, Serialize)]
pub struct ErrorProgressMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub message: String,
}

/// Done message with the final statistics
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    #[serde(rename = "np")]
    pub new_photos: u64,
    #[serde(rename = "ni")]
    pub new_instances: u64,
    #[serde(rename = "nf")]
    pub new_folders: u64,
    #[serde(rename = "fc")]
    pub files_checked: u64,
    #[serde(rename = "nx")]
    pub not_images: u64,
    #[serde(rename = "sk")]
    pub skipped: u64,
    #[serde(rename = "df")]
    pub deleted_folders: u64,
    #[serde(rename = "rl")]
    pub removed_locations: u64,
    pub ms: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl DoneMessage {
    fn from_stats(seq: u64, ts: u64, stats: &IndexStats, cancelled: bool) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            new_photos: stats.new_photo_count,
            new_instances: stats.new_instance_count,
            new_folders: stats.new_folder_count,
            files_checked: stats.files_checked,
            not_images: stats.not_image_count,
            skipped: stats.skipped_count,
            deleted_folders: stats.deleted_folder_count,
            removed_locations: stats.removed_location_count,
            ms: stats.duration_ms,
            cancelled,
        }
    }
}

/// Listener writing JSON lines
pub struct JsonLinesReporter<W: Write = Stderr> {
    out: W,
    /// Minimum interval between progress lines in milliseconds
    interval_ms: u64,
    report_files: bool,
    last_report: Option<Instant>,
    seq: u64,
    start_time: Instant,
    new_photos: u64,
    new_instances: u64,
    not_images: u64,
}

impl JsonLinesReporter<Stderr> {
    /// Reporter writing to stderr
    pub fn stderr(interval_ms: u64) -> Self {
        Self::with_writer(std::io::stderr(), interval_ms)
    }
}

impl<W: Write> JsonLinesReporter<W> {
    pub fn with_writer(out: W, interval_ms: u64) -> Self {
        Self {
            out,
            interval_ms,
            report_files: false,
            last_report: None,
            seq: 0,
            start_time: Instant::now(),
            new_photos: 0,
            new_instances: 0,
            not_images: 0,
        }
    }

    /// Also write one line per indexed file
    pub fn report_files(mut self, enabled: bool) -> Self {
        self.report_files = enabled;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn should_report(&self) -> bool {
        match self.last_report {
            None => true,
            Some(last) => last.elapsed().as_millis() as u64 >= self.interval_ms,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn write_line<T: Serialize>(&mut self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            let _ = writeln!(self.out, "{}", json);
            let _ = self.out.flush();
        }
    }

    fn write_progress(&mut self, percent: f64) {
        let msg = ProgressMessage {
            msg_type: "p",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            pct: (percent * 10.0).round() / 10.0,
            new_photos: self.new_photos,
            new_instances: self.new_instances,
            not_images: self.not_images,
        };
        self.write_line(&msg);
        self.last_report = Some(Instant::now());
    }
}

impl<W: Write> IndexListener for JsonLinesReporter<W> {
    fn on_start(&mut self, volume: &Volume) {
        let msg = StartMessage {
            msg_type: "start",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            volume: volume.name.clone(),
            base_path: volume.base_path.to_string_lossy().to_string(),
        };
        self.write_line(&msg);
    }

    fn on_file_indexed(&mut self, event: &FileIndexedEvent) {
        match event.outcome {
            IndexOutcome::NewPhoto => self.new_photos += 1,
            IndexOutcome::NewInstance => self.new_instances += 1,
            IndexOutcome::NotImage => self.not_images += 1,
        }
        if self.report_files {
            let msg = FileMessage {
                msg_type: "f",
                seq: self.next_seq(),
                ts: self.current_timestamp(),
                path: event.path.to_string_lossy().to_string(),
                outcome: event.outcome,
            };
            self.write_line(&msg);
        }
    }

    fn on_progress(&mut self, percent: f64) {
        if self.should_report() {
            self.write_progress(percent);
        }
    }

    fn on_complete(&mut self, stats: &IndexStats) {
        // The final 100% line is never throttled
        self.write_progress(100.0);
        let msg = DoneMessage::from_stats(self.next_seq(), self.current_timestamp(), stats, false);
        self.write_line(&msg);
    }

    fn on_error(&mut self, message: &str) {
        let msg = ErrorProgressMessage {
            msg_type: "err",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            message: message.to_string(),
        };
        self.write_line(&msg);
    }

    fn on_cancelled(&mut self, stats: &IndexStats) {
        let msg = DoneMessage::from_stats(self.next_seq(), self.current_timestamp(), stats, true);
        self.write_line(&msg);
    }
}
