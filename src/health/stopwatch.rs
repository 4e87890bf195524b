//! Rolling-window latency tracking for role probes
//!
//! Each endpoint keeps the last `window_size` probe durations. The median is
//! computed lazily and cached until the next sample arrives.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;

/// Samples for a single key
#[derive(Debug)]
struct Window {
    samples: VecDeque<Duration>,
    median: Option<Duration>,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            median: None,
        }
    }

    fn push(&mut self, sample: Duration, window_size: usize) {
        if self.samples.len() >= window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.median = None;
    }

    fn median(&mut self) -> Option<Duration> {
        if self.median.is_none() {
            self.median = median(&self.samples);
        }
        self.median
    }
}

fn median(samples: &VecDeque<Duration>) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2)
    }
}

/// Per-key latency tracker with a fixed-size rolling window
#[derive(Debug)]
pub struct Stopwatch<K> {
    window_size: usize,
    windows: Mutex<HashMap<K, Window>>,
}

impl<K: Eq + Hash + Copy> Stopwatch<K> {
    /// `window_size` is clamped to at least one sample
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one sample for `key`
    pub fn record(&self, key: K, elapsed: Duration) {
        let mut windows = self.windows.lock();
        windows
            .entry(key)
            .or_insert_with(|| Window::new(self.window_size))
            .push(elapsed, self.window_size);
    }

    /// Median of the recorded samples, `None` if `key` was never measured
    pub fn get_time(&self, key: K) -> Option<Duration> {
        self.windows.lock().get_mut(&key).and_then(Window::median)
    }

    /// Number of samples currently in the window for `key`
    pub fn sample_count(&self, key: K) -> usize {
        self.windows
            .lock()
            .get(&key)
            .map(|w| w.samples.len())
            .unwrap_or(0)
    }
}
