//! Writer health classification.

use serde::Serialize;

/// Coarse health signal of a storage writer.
///
/// Computed from how many tasks finished compared to how many arrived since
/// the previous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WritingStatus {
    /// The writer keeps up with arrivals.
    Good,
    /// The writer finishes at least half of what arrives.
    Medium,
    /// The writer falls behind.
    Bad,
}

impl WritingStatus {
    /// Classifies one sample.
    #[must_use]
    pub fn from_counts(arrived: u64, finished: u64) -> Self {
        if arrived == 0 {
            return Self::Good;
        }
        let ratio = finished as f64 / arrived as f64;
        if ratio >= 0.9 {
            Self::Good
        } else if ratio >= 0.5 {
            Self::Medium
        } else {
            Self::Bad
        }
    }

    /// True for every classification other than [`WritingStatus::Good`].
    #[must_use]
    pub const fn is_degrading(self) -> bool {
        !matches!(self, Self::Good)
    }
}

/// Turns running totals into per-interval [`WritingStatus`] samples.
#[derive(Debug)]
pub struct WritingStatusTracker {
    last_submitted: u64,
    last_completed: u64,
    status: WritingStatus,
}

impl Default for WritingStatusTracker {
    fn default() -> Self {
        Self {
            last_submitted: 0,
            last_completed: 0,
            status: WritingStatus::Good,
        }
    }
}

impl WritingStatusTracker {
    /// Creates a tracker reporting [`WritingStatus::Good`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample from the writer's running totals.
    pub fn sample(&mut self, submitted: u64, completed: u64) -> WritingStatus {
        let arrived = submitted.saturating_sub(self.last_submitted);
        let finished = completed.saturating_sub(self.last_completed);
        self.last_submitted = submitted;
        self.last_completed = completed;
        self.status = WritingStatus::from_counts(arrived, finished);
        self.status
    }

    /// Returns the last computed status.
    #[must_use]
    pub const fn status(&self) -> WritingStatus {
        self.status
    }
}
