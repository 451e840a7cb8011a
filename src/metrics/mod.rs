mod types;

pub use types::{FrameMetrics, MetricsSnapshot};

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const MAX_RECENT_FRAMES: usize = 20;

/// Per-frame timings and tracking outcomes for the running capture loop.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

#[derive(Default)]
struct MetricsState {
    recent_frames: Vec<FrameMetrics>,
    frame_count: u64,
    hit_count: u64,
    appended_count: u64,
    misses: BTreeMap<String, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_frames: Vec::with_capacity(MAX_RECENT_FRAMES),
                ..MetricsState::default()
            })),
        }
    }

    pub async fn record_frame(&self, metrics: FrameMetrics) {
        let mut state = self.inner.lock().await;

        state.frame_count += 1;
        match metrics.miss {
            None => state.hit_count += 1,
            Some(reason) => {
                let key = format!("{reason:?}");
                *state.misses.entry(key).or_insert(0) += 1;
            }
        }
        if metrics.appended {
            state.appended_count += 1;
        }

        state.recent_frames.push(metrics);

        if state.recent_frames.len() > MAX_RECENT_FRAMES {
            state.recent_frames.remove(0);
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let state = self.inner.lock().await;
        MetricsSnapshot {
            recent_frames: state.recent_frames.clone(),
            frame_count: state.frame_count,
            hit_count: state.hit_count,
            appended_count: state.appended_count,
            misses: state.misses.clone(),
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.recent_frames.clear();
        state.frame_count = 0;
        state.hit_count = 0;
        state.appended_count = 0;
        state.misses.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::TrackingDegenerate;
    use chrono::Utc;

    fn frame(sequence: u64, miss: Option<TrackingDegenerate>) -> FrameMetrics {
        FrameMetrics {
            timestamp: Utc::now(),
            sequence,
            acquire_ms: 1,
            track_ms: 2,
            render_ms: 3,
            total_ms: 6,
            miss,
            appended: miss.is_none(),
        }
    }

    #[tokio::test]
    async fn keeps_last_twenty_frames_and_counts_everything() {
        let metrics = MetricsCollector::new();
        for i in 0..25 {
            let miss = if i % 5 == 0 {
                Some(TrackingDegenerate::NoContour)
            } else {
                None
            };
            metrics.record_frame(frame(i, miss)).await;
        }

        let snapshot = metrics.get_snapshot().await;
        assert_eq!(snapshot.recent_frames.len(), 20);
        assert_eq!(snapshot.recent_frames[0].sequence, 5);
        assert_eq!(snapshot.frame_count, 25);
        assert_eq!(snapshot.hit_count, 20);
        assert_eq!(snapshot.appended_count, 20);
        assert_eq!(snapshot.misses.get("NoContour"), Some(&5));

        metrics.reset().await;
        assert_eq!(metrics.get_snapshot().await.frame_count, 0);
    }
}
