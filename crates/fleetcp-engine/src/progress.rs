//! Byte-progress aggregation across concurrent parts
//!
//! One logical transfer may run many commands at once; each is a "part"
//! with its own byte counter parsed from tool output. The aggregator keeps
//! the highest value seen per part and folds finished parts into a
//! finalized accumulator, so the total reported to observers never
//! decreases, even as parts complete and leave the in-flight map.

use fleetcp_types::{PartId, TransferId};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

/// Matches the cumulative byte counter in `--info=progress2` output lines,
/// e.g. `  1,234,567  42%  103.41MB/s  0:00:11`.
static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*([0-9][0-9,]*)\s+\d+%").unwrap_or_else(|e| panic!("{e}")));

/// Extract the latest absolute byte count from a raw output chunk.
///
/// Chunks may contain several progress lines (carriage-return updates
/// arrive coalesced); the last one wins.
pub fn parse_progress_bytes(chunk: &str) -> Option<u64> {
    let normalized = chunk.replace('\r', "\n");
    PROGRESS_RE
        .captures_iter(&normalized)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

/// Bounded random walk producing a plausible instantaneous speed figure.
///
/// Purely a UI signal; nothing reads it for control decisions.
#[derive(Debug, Clone)]
pub struct SpeedSimulator {
    min: f64,
    max: f64,
    current: f64,
}

impl SpeedSimulator {
    /// Create a simulator bounded to `[min, max]` MB/s
    pub fn new(min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            current: (min + max) / 2.0,
        }
    }

    /// Advance the walk one step and return the new value
    pub fn tick(&mut self) -> f64 {
        let step = rand::thread_rng().gen_range(-0.7..=0.7);
        self.current = (self.current + step).clamp(self.min, self.max);
        self.current
    }

    /// Current value without advancing
    pub fn current(&self) -> f64 {
        self.current
    }
}

#[derive(Debug, Default)]
struct ByteProgress {
    inflight: HashMap<PartId, u64>,
    finalized: u64,
}

impl ByteProgress {
    fn observe(&mut self, part: &str, bytes: u64) {
        let entry = self.inflight.entry(part.to_string()).or_insert(0);
        if bytes > *entry {
            *entry = bytes;
        }
    }

    fn finalize(&mut self, part: &str, final_bytes_hint: Option<u64>) {
        let observed = self.inflight.remove(part).unwrap_or(0);
        self.finalized += observed.max(final_bytes_hint.unwrap_or(0));
    }

    fn total(&self) -> u64 {
        self.finalized + self.inflight.values().sum::<u64>()
    }
}

#[derive(Debug)]
struct TransferProgress {
    bytes: ByteProgress,
    speed: SpeedSimulator,
}

/// Shared progress state for all active transfers
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    inner: StdMutex<HashMap<TransferId, TransferProgress>>,
}

impl ProgressAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer with its simulated-speed band
    pub fn register(&self, transfer: TransferId, speed_band: (f64, f64)) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entry(transfer).or_insert_with(|| TransferProgress {
            bytes: ByteProgress::default(),
            speed: SpeedSimulator::new(speed_band.0, speed_band.1),
        });
    }

    /// Record a byte count for one running part. Decreases for the same
    /// part are ignored.
    pub fn observe(&self, transfer: TransferId, part: &str, bytes: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(progress) = inner.get_mut(&transfer) {
            progress.bytes.observe(part, bytes);
        }
    }

    /// Feed a raw output chunk for a part, recording any byte count it
    /// carries. Returns the parsed count when one was found.
    pub fn observe_chunk(&self, transfer: TransferId, part: &str, chunk: &str) -> Option<u64> {
        let bytes = parse_progress_bytes(chunk)?;
        self.observe(transfer, part, bytes);
        Some(bytes)
    }

    /// Move a finished part into the finalized accumulator. The larger of
    /// the last observation and the hint is kept, so late exact sizes can
    /// only raise the total.
    pub fn finalize(&self, transfer: TransferId, part: &str, final_bytes_hint: Option<u64>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(progress) = inner.get_mut(&transfer) {
            progress.bytes.finalize(part, final_bytes_hint);
        }
    }

    /// Current monotonic byte total for a transfer
    pub fn total(&self, transfer: TransferId) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(&transfer).map_or(0, |p| p.bytes.total())
    }

    /// Advance and return the transfer's simulated speed in MB/s
    pub fn tick_speed(&self, transfer: TransferId) -> f64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get_mut(&transfer).map_or(0.0, |p| p.speed.tick())
    }

    /// Drop all state for a transfer
    pub fn clear(&self, transfer: TransferId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(&transfer);
    }

    /// Number of transfers currently tracked
    pub fn tracked(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_lines() {
        assert_eq!(
            parse_progress_bytes("  1,234,567  42%  103.41MB/s  0:00:11"),
            Some(1_234_567)
        );
        assert_eq!(parse_progress_bytes("       512   0% "), Some(512));
        assert_eq!(parse_progress_bytes("sending incremental file list"), None);
    }

    #[test]
    fn test_parse_takes_last_update_in_chunk() {
        let chunk = "  100  1%  1MB/s\r  900  9%  1MB/s\r  2,000  20%  1MB/s";
        assert_eq!(parse_progress_bytes(chunk), Some(2_000));
    }

    #[test]
    fn test_per_part_monotonic() {
        let agg = ProgressAggregator::new();
        let id = TransferId::new();
        agg.register(id, (110.0, 114.0));
        agg.observe(id, "part-0", 1000);
        agg.observe(id, "part-0", 400);
        assert_eq!(agg.total(id), 1000);
        agg.observe(id, "part-0", 2500);
        assert_eq!(agg.total(id), 2500);
    }

    #[test]
    fn test_total_survives_finalize() {
        let agg = ProgressAggregator::new();
        let id = TransferId::new();
        agg.register(id, (50.0, 55.0));
        agg.observe(id, "part-0", 1000);
        agg.observe(id, "part-1", 3000);
        assert_eq!(agg.total(id), 4000);

        agg.finalize(id, "part-0", None);
        assert_eq!(agg.total(id), 4000);

        // A larger exact size raises the total; a smaller one cannot
        // lower it
        agg.finalize(id, "part-1", Some(3500));
        assert_eq!(agg.total(id), 4500);
    }

    #[test]
    fn test_finalize_hint_never_regresses() {
        let agg = ProgressAggregator::new();
        let id = TransferId::new();
        agg.register(id, (50.0, 55.0));
        agg.observe(id, "part-0", 9000);
        agg.finalize(id, "part-0", Some(100));
        assert_eq!(agg.total(id), 9000);
    }

    #[test]
    fn test_speed_stays_in_band() {
        let mut sim = SpeedSimulator::new(110.0, 114.0);
        for _ in 0..500 {
            let v = sim.tick();
            assert!((110.0..=114.0).contains(&v));
        }
    }

    #[test]
    fn test_clear_drops_state() {
        let agg = ProgressAggregator::new();
        let id = TransferId::new();
        agg.register(id, (50.0, 55.0));
        agg.observe(id, "part-0", 1000);
        agg.clear(id);
        assert_eq!(agg.total(id), 0);
        assert_eq!(agg.tracked(), 0);
    }
}
