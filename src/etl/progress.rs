//! Progress accounting for a run.
//!
//! [`ProgressState`] holds the counters and is safe to share between tasks.
//! Rendering is left to a [`ProgressDisplay`]; the terminal implementation uses
//! an `indicatif` bar.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters for one run. Created fresh for every invocation.
#[derive(Debug)]
pub struct ProgressState {
    lines: AtomicU64,
    started: Instant,
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            lines: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Adds `count` lines and returns the new total.
    pub fn add(&self, count: u64) -> u64 {
        self.lines.fetch_add(count, Ordering::SeqCst) + count
    }

    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders progress somewhere.
pub trait ProgressDisplay: Send + Sync {
    /// `current` lines seen so far; `total` when known.
    fn update(&self, current: u64, total: Option<u64>, unit: &str);
    fn close(&self);
}

/// Display that renders nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisplay;

impl ProgressDisplay for NoopDisplay {
    fn update(&self, _current: u64, _total: Option<u64>, _unit: &str) {}

    fn close(&self) {}
}

/// Terminal progress bar drawn on stderr.
pub struct TerminalDisplay {
    bar: ProgressBar,
}

impl TerminalDisplay {
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{msg}: {spinner} [{elapsed_precise}] {human_pos} {prefix} ({per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(message.to_string());
        Self { bar }
    }
}

impl ProgressDisplay for TerminalDisplay {
    fn update(&self, current: u64, total: Option<u64>, unit: &str) {
        if let Some(total) = total {
            if self.bar.length() != Some(total) {
                self.bar.set_length(total);
            }
        }
        self.bar.set_prefix(unit.to_string());
        self.bar.set_position(current);
    }

    fn close(&self) {
        self.bar.finish();
    }
}

/// Tracks lines read against an optional total and forwards to a display.
pub struct ProgressReporter {
    state: Arc<ProgressState>,
    total: Option<u64>,
    display: Box<dyn ProgressDisplay>,
}

impl ProgressReporter {
    pub const UNIT: &'static str = "lines";

    pub fn new(state: Arc<ProgressState>, display: Box<dyn ProgressDisplay>) -> Self {
        Self {
            state,
            total: None,
            display,
        }
    }

    /// Reporter with fresh state that renders nothing.
    pub fn hidden() -> Self {
        Self::new(Arc::new(ProgressState::new()), Box::new(NoopDisplay))
    }

    /// Starts over with zeroed counters, a new start time and no total.
    pub fn restart(&mut self) {
        self.state = Arc::new(ProgressState::new());
        self.total = None;
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = Some(total);
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn update(&self, count: u64) {
        let current = self.state.add(count);
        self.display.update(current, self.total, Self::UNIT);
    }

    pub fn close(&self) {
        self.display.close();
    }

    pub fn lines(&self) -> u64 {
        self.state.lines()
    }

    pub fn elapsed(&self) -> Duration {
        self.state.elapsed()
    }
}
