//! history export: stored rows, thinned to at most `max_points`

use crate::domain::{SensorSeries, StoredReading};

/// point budget when none (or 0) is given
pub const DEFAULT_MAX_POINTS: usize = 2000;

/// keep every `ceil(len / max_points)`-th row, starting with the first
///
/// `max_points == 0` falls back to `DEFAULT_MAX_POINTS`.
pub fn downsample(rows: &[StoredReading], max_points: usize) -> SensorSeries {
    let max_points = if max_points == 0 { DEFAULT_MAX_POINTS } else { max_points };
    let step = rows.len().div_ceil(max_points).max(1);

    let mut series = SensorSeries::default();
    for row in rows.iter().step_by(step) {
        series.dateandtime.push(row.timestamp);
        series.temperature.push(row.temperature);
        series.humidity.push(row.humidity);
    }
    series
}
