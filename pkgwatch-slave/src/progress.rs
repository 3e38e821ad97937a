//! Progress relaying: engine observers that turn blocking-side ticks
//! into `ProgressUpdate` frames on the reply channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use pkgwatch_engine::{FetchObserver, FetchProgress, OpProgress};
use pkgwatch_proto::Reply;

/// Maps an engine-reported 0–100 percentage into a slice of the
/// overall progress bar. An update runs the fetch in the lower half
/// and the cache rebuild in the upper half, so the client sees one
/// continuous bar.
#[derive(Debug, Clone, Copy)]
pub struct ProgressBand {
    base: f32,
    span: f32,
}

impl ProgressBand {
    pub const FETCH: ProgressBand = ProgressBand {
        base: 0.0,
        span: 50.0,
    };
    pub const REOPEN: ProgressBand = ProgressBand {
        base: 50.0,
        span: 50.0,
    };
    pub const FULL: ProgressBand = ProgressBand {
        base: 0.0,
        span: 100.0,
    };

    pub fn map(&self, percent: f32) -> f32 {
        self.base + percent.clamp(0.0, 100.0) * self.span / 100.0
    }
}

/// "317b", "12.3kb", "4.0mb".
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{bytes}b")
    } else if b < MB {
        format!("{:.1}kb", b / KB)
    } else if b < GB {
        format!("{:.1}mb", b / MB)
    } else {
        format!("{:.1}gb", b / GB)
    }
}

/// Label for one fetch tick: "12.3kb/45.6kb; 7s remaining" when byte
/// counts are known, "3/12 items" otherwise.
pub fn format_fetch_tick(progress: &FetchProgress) -> String {
    if progress.total_bytes > 0 {
        let mut label = format!(
            "{}/{}",
            format_size(progress.current_bytes),
            format_size(progress.total_bytes)
        );
        if progress.bytes_per_sec > 0 && progress.current_bytes < progress.total_bytes {
            let secs = (progress.total_bytes - progress.current_bytes) / progress.bytes_per_sec;
            label.push_str(&format!("; {secs}s remaining"));
        }
        label
    } else {
        format!(
            "{}/{} items",
            progress.current_items, progress.total_items
        )
    }
}

fn fetch_percent(progress: &FetchProgress) -> f32 {
    if progress.total_bytes > 0 {
        progress.current_bytes as f32 * 100.0 / progress.total_bytes as f32
    } else if progress.total_items > 0 {
        progress.current_items as f32 * 100.0 / progress.total_items as f32
    } else {
        0.0
    }
}

/// Forwards fetch ticks onto the reply channel and polls the shared
/// abort flag once per tick.
pub struct ChannelFetchObserver {
    tx: UnboundedSender<Reply>,
    abort: Arc<AtomicBool>,
    band: ProgressBand,
    emit_done: bool,
}

impl ChannelFetchObserver {
    pub fn new(
        tx: UnboundedSender<Reply>,
        abort: Arc<AtomicBool>,
        band: ProgressBand,
        emit_done: bool,
    ) -> Self {
        Self {
            tx,
            abort,
            band,
            emit_done,
        }
    }
}

impl FetchObserver for ChannelFetchObserver {
    fn tick(&mut self, progress: &FetchProgress) {
        let _ = self.tx.send(Reply::ProgressUpdate {
            op: format_fetch_tick(progress),
            percent: self.band.map(fetch_percent(progress)),
            major_change: false,
        });
    }

    fn cancelled(&mut self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn done(&mut self) {
        if self.emit_done {
            let _ = self.tx.send(Reply::ProgressDone);
        }
    }
}

/// Forwards cache (re)open progress onto the reply channel.
pub struct ChannelOpProgress {
    tx: UnboundedSender<Reply>,
    band: ProgressBand,
    emit_done: bool,
}

impl ChannelOpProgress {
    pub fn new(tx: UnboundedSender<Reply>, band: ProgressBand, emit_done: bool) -> Self {
        Self {
            tx,
            band,
            emit_done,
        }
    }
}

impl OpProgress for ChannelOpProgress {
    fn update(&mut self, op: &str, percent: f32, major_change: bool) {
        let _ = self.tx.send(Reply::ProgressUpdate {
            op: op.to_string(),
            percent: self.band.map(percent),
            major_change,
        });
    }

    fn done(&mut self) {
        if self.emit_done {
            let _ = self.tx.send(Reply::ProgressDone);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_a_readable_unit() {
        assert_eq!(format_size(317), "317b");
        assert_eq!(format_size(12 * 1024 + 300), "12.3kb");
        assert_eq!(format_size(4 * 1024 * 1024), "4.0mb");
    }

    #[test]
    fn byte_ticks_carry_an_eta() {
        let label = format_fetch_tick(&FetchProgress {
            current_bytes: 10 * 1024,
            total_bytes: 80 * 1024,
            current_items: 1,
            total_items: 4,
            bytes_per_sec: 10 * 1024,
        });
        assert_eq!(label, "10.0kb/80.0kb; 7s remaining");
    }

    #[test]
    fn item_ticks_are_used_when_byte_counts_are_unknown() {
        let label = format_fetch_tick(&FetchProgress {
            current_items: 3,
            total_items: 12,
            ..FetchProgress::default()
        });
        assert_eq!(label, "3/12 items");
    }

    #[test]
    fn bands_split_the_bar_between_fetch_and_rebuild() {
        assert_eq!(ProgressBand::FETCH.map(100.0), 50.0);
        assert_eq!(ProgressBand::REOPEN.map(0.0), 50.0);
        assert_eq!(ProgressBand::REOPEN.map(100.0), 100.0);
        assert_eq!(ProgressBand::FULL.map(42.0), 42.0);
    }
}
