use super::{TelemetryFix, TelemetryTrace};
use crate::error::TelemetryError;
use crate::pipeline::types::FrameRecord;
use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Closest fix to `target` by absolute time difference, O(log n).
///
/// Targets before the first fix or after the last clamp to that end. When
/// two neighbours are equally close the earlier one wins.
pub fn nearest(trace: &TelemetryTrace, target: DateTime<Utc>) -> Result<&TelemetryFix, TelemetryError> {
    let fixes = trace.fixes();
    if fixes.is_empty() {
        return Err(TelemetryError::EmptyTrace);
    }

    let target = target.trunc_subsecs(0);
    let pos = fixes.partition_point(|f| f.timestamp < target);
    if pos == 0 {
        return Ok(&fixes[0]);
    }
    if pos == fixes.len() {
        return Ok(&fixes[pos - 1]);
    }

    let before = &fixes[pos - 1];
    let after = &fixes[pos];
    if target - before.timestamp <= after.timestamp - target {
        Ok(before)
    } else {
        Ok(after)
    }
}

/// Absolute instant of a frame `relative_secs` into the recording.
pub fn to_absolute(start: DateTime<Utc>, relative_secs: f64) -> DateTime<Utc> {
    start + Duration::milliseconds((relative_secs * 1000.0).round() as i64)
}

/// Stamps every record with its absolute time and nearest position.
pub fn correlate(trace: &TelemetryTrace, records: &mut [FrameRecord]) -> Result<usize, TelemetryError> {
    let start = trace.start()?;
    let mut max_gap = Duration::zero();

    for record in records.iter_mut() {
        let absolute = to_absolute(start, record.relative_timestamp_secs);
        let fix = nearest(trace, absolute)?;
        let gap = fix.timestamp - absolute.trunc_subsecs(0);
        max_gap = max_gap.max(if gap < Duration::zero() { -gap } else { gap });
        record.absolute_timestamp = Some(absolute);
        record.latitude = Some(fix.latitude);
        record.longitude = Some(fix.longitude);
    }

    tracing::info!(
        "Correlated {} frames against {} fixes (largest gap {}s)",
        records.len(),
        trace.len(),
        max_gap.num_seconds()
    );
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::tests::{at, fix, SAMPLE_GPX};
    use assert_matches::assert_matches;
    use std::path::{Path, PathBuf};

    fn trace(secs: &[i64]) -> TelemetryTrace {
        TelemetryTrace::from_fixes(
            Some(at(0)),
            secs.iter().map(|&s| fix(s, s as f64, -(s as f64))).collect(),
        )
    }

    #[test]
    fn test_nearest_clamps_to_ends() {
        let trace = trace(&[10, 20, 30]);
        assert_eq!(nearest(&trace, at(-100)).unwrap().timestamp, at(10));
        assert_eq!(nearest(&trace, at(5)).unwrap().timestamp, at(10));
        assert_eq!(nearest(&trace, at(31)).unwrap().timestamp, at(30));
    }

    #[test]
    fn test_nearest_exact_and_closest() {
        let trace = trace(&[10, 20, 30]);
        assert_eq!(nearest(&trace, at(20)).unwrap().timestamp, at(20));
        assert_eq!(nearest(&trace, at(18)).unwrap().timestamp, at(20));
        assert_eq!(nearest(&trace, at(12)).unwrap().timestamp, at(10));
        assert_eq!(nearest(&trace, at(26)).unwrap().timestamp, at(30));
    }

    #[test]
    fn test_nearest_tie_prefers_earlier_fix() {
        let trace = trace(&[10, 20]);
        assert_eq!(nearest(&trace, at(15)).unwrap().timestamp, at(10));
    }

    #[test]
    fn test_nearest_truncates_target_subseconds() {
        let trace = trace(&[10, 11]);
        // 10.9s truncates to 10s before comparison
        let target = at(10) + Duration::milliseconds(900);
        assert_eq!(nearest(&trace, target).unwrap().timestamp, at(10));
    }

    #[test]
    fn test_nearest_on_empty_trace_fails() {
        let empty = TelemetryTrace::from_fixes(Some(at(0)), Vec::new());
        for probe in [at(-5), at(0), at(500)] {
            assert_matches!(nearest(&empty, probe), Err(TelemetryError::EmptyTrace));
        }
    }

    #[test]
    fn test_to_absolute_offsets_start() {
        assert_eq!(to_absolute(at(0), 2.0), at(2));
        assert_eq!(
            to_absolute(at(0), 0.5),
            at(0) + Duration::milliseconds(500)
        );
    }

    #[test]
    fn test_correlate_positions_records() {
        let trace = TelemetryTrace::parse_str(SAMPLE_GPX).unwrap();
        let video = Path::new("clip.mp4");
        let mut records: Vec<FrameRecord> = [0.0, 4.0, 8.0, 60.0]
            .iter()
            .enumerate()
            .map(|(i, &t)| FrameRecord::new(PathBuf::from(format!("clip_{:04}.jpg", i + 1)), video, t))
            .collect();

        assert_eq!(correlate(&trace, &mut records).unwrap(), 4);

        let lats: Vec<_> = records.iter().map(|r| r.latitude.unwrap()).collect();
        assert_eq!(lats, vec![35.1, 35.15, 35.2, 35.2]);
        assert_eq!(records[1].absolute_timestamp, Some(trace.start().unwrap() + Duration::seconds(4)));
    }

    #[test]
    fn test_correlate_empty_trace_is_fatal() {
        let empty = TelemetryTrace::from_fixes(None, Vec::new());
        let mut records = vec![FrameRecord::new(PathBuf::from("a.jpg"), Path::new("v.mp4"), 1.0)];
        assert_matches!(correlate(&empty, &mut records), Err(TelemetryError::EmptyTrace));
        assert!(records[0].latitude.is_none());
    }
}
