use std::sync::Arc;

#[cfg(feature = "render_progress")]
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

#[cfg(feature = "render_progress")]
const DEFAULT_PROGRESS: &str = "{elapsed_precise} {bar:30.blue/red} {pos:>3}%";
#[cfg(feature = "render_progress")]
const PROGRESS_LINE: &str = "━╾╴─";

/// Receives one whole percentage in `0..=100` per dispatched progress event.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Collapses raw percentages into whole-percent steps, remembering the last
/// value handed out. One tracker belongs to exactly one download.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rounds `percent` (half to even) and returns it if it differs from the
    /// last reported value. Input outside `0..=100` is clamped first.
    pub fn update(&mut self, percent: f64) -> Option<u8> {
        let current = percent.clamp(0.0, 100.0).round_ties_even() as u8;
        if current == self.last {
            return None;
        }
        self.last = current;
        Some(current)
    }

    pub fn last(&self) -> u8 {
        self.last
    }
}

/// Prints every progress value on its own line.
pub fn print_progress() -> ProgressFn {
    Arc::new(|percent| println!("{percent}"))
}

#[cfg(feature = "render_progress")]
pub struct Progress {
    multi: MultiProgress,
    style: ProgressStyle,
}

#[cfg(feature = "render_progress")]
impl Default for Progress {
    fn default() -> Self {
        Self::new(
            ProgressStyle::with_template(DEFAULT_PROGRESS)
                .expect("default progress template is valid")
                .progress_chars(PROGRESS_LINE),
        )
    }
}

#[cfg(feature = "render_progress")]
impl Progress {
    pub fn new(style: ProgressStyle) -> Self {
        Self {
            multi: MultiProgress::new(),
            style,
        }
    }
    pub fn with_multi(mut self, multi: MultiProgress) -> Self {
        self.multi = multi;
        self
    }

    /// Adds a fresh 0..100 bar for one download.
    pub(crate) fn new_bar(&self) -> ProgressBar {
        self.multi
            .add(ProgressBar::new(100).with_style(self.style.clone()))
    }

    /// Observer for one download, drawing on its own bar.
    pub(crate) fn observer(&self) -> ProgressFn {
        bar_observer(self.new_bar())
    }
}

#[cfg(feature = "render_progress")]
fn bar_observer(bar: ProgressBar) -> ProgressFn {
    Arc::new(move |percent| {
        bar.set_position(percent as u64);
        if percent == 100 {
            bar.finish();
        }
    })
}
