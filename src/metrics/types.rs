use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tracking::TrackingDegenerate;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetrics {
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub acquire_ms: u64,
    pub track_ms: u64,
    pub render_ms: u64,
    pub total_ms: u64,
    /// `None` when the tracker returned a point.
    pub miss: Option<TrackingDegenerate>,
    pub appended: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub recent_frames: Vec<FrameMetrics>,
    pub frame_count: u64,
    pub hit_count: u64,
    pub appended_count: u64,
    pub misses: BTreeMap<String, u64>,
}
