//! 24-hour lake level trend.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Samples older than this are pruned.
const HISTORY_RETENTION_HOURS: i64 = 30;
/// Age of the sample the trend compares against.
const TREND_LOOKBACK_HOURS: i64 = 24;
/// How far a sample's age may stray from the lookback and still count.
const TREND_TOLERANCE_HOURS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct TrendAnnotation {
    /// Change in feet over roughly 24 hours
    pub delta: f64,
    pub direction: TrendDirection,
}

pub fn compute_trend(current: f64, prior: f64, steady_threshold: f64) -> TrendAnnotation {
    let delta = current - prior;
    let direction = if delta.abs() < steady_threshold {
        TrendDirection::Steady
    } else if delta > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };
    TrendAnnotation { delta, direction }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LevelSample {
    observed_at: DateTime<Utc>,
    level: f64,
}

/// In-memory ring of recent lake level readings, oldest first.
#[derive(Debug, Default)]
pub struct LevelHistory {
    samples: VecDeque<LevelSample>,
}

impl LevelHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading. Repeated or out-of-order timestamps are ignored.
    pub fn record(&mut self, observed_at: DateTime<Utc>, level: f64) {
        if self
            .samples
            .back()
            .is_some_and(|last| observed_at <= last.observed_at)
        {
            return;
        }
        self.samples.push_back(LevelSample { observed_at, level });

        let cutoff = observed_at - Duration::hours(HISTORY_RETENTION_HOURS);
        while self.samples.front().is_some_and(|s| s.observed_at < cutoff) {
            self.samples.pop_front();
        }
    }

    /// The sample closest to 24h before `now`, if one lies within tolerance.
    pub fn prior_sample(&self, now: DateTime<Utc>) -> Option<f64> {
        let target = now - Duration::hours(TREND_LOOKBACK_HOURS);
        let tolerance = Duration::hours(TREND_TOLERANCE_HOURS);
        self.samples
            .iter()
            .map(|s| (s, (s.observed_at - target).abs()))
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by_key(|(_, distance)| *distance)
            .map(|(s, _)| s.level)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.len()
    }
}
