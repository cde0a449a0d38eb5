// GPS telemetry: parsed track logs and frame correlation

pub mod aligner;
pub mod provider;

use crate::error::TelemetryError;
use chrono::{DateTime, SubsecRound, Utc};
use geo_types::Point;
use serde::Serialize;
use std::io::{BufReader, Read};

/// One GPS sample, timestamp truncated to whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryFix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub speed: Option<f64>,
}

impl TelemetryFix {
    /// Position as an `(x = lon, y = lat)` point.
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Sorted, de-duplicated fixes for one recording.
#[derive(Debug, Clone)]
pub struct TelemetryTrace {
    start: Option<DateTime<Utc>>,
    fixes: Vec<TelemetryFix>,
}

impl TelemetryTrace {
    /// Builds a trace from fixes in any order.
    ///
    /// Timestamps are truncated to whole seconds, fixes are stably sorted and
    /// repeated timestamps keep only their first fix. The recording start is
    /// `start` if given, otherwise the earliest fix.
    pub fn from_fixes(start: Option<DateTime<Utc>>, mut fixes: Vec<TelemetryFix>) -> Self {
        for fix in &mut fixes {
            fix.timestamp = fix.timestamp.trunc_subsecs(0);
        }
        fixes.sort_by_key(|f| f.timestamp);
        fixes.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);

        let start = match start {
            Some(start) => Some(start.trunc_subsecs(0)),
            None => {
                let first = fixes.first().map(|f| f.timestamp);
                if first.is_some() {
                    tracing::warn!("Track log has no header time, using the first fix as start");
                }
                first
            }
        };
        Self { start, fixes }
    }

    /// Parses a GPX track log. Fixes without a time are skipped.
    pub fn parse<R: Read>(reader: R) -> Result<Self, TelemetryError> {
        let gpx = gpx::read(BufReader::new(reader))
            .map_err(|e| TelemetryError::Parse(e.to_string()))?;

        let start = match gpx.metadata.and_then(|m| m.time) {
            Some(time) => Some(gpx_time_to_utc(time)?),
            None => None,
        };

        let mut fixes = Vec::new();
        for track in gpx.tracks {
            for segment in track.segments {
                for point in segment.points {
                    let Some(time) = point.time else {
                        continue;
                    };
                    let position = point.point();
                    fixes.push(TelemetryFix {
                        timestamp: gpx_time_to_utc(time)?,
                        latitude: position.y(),
                        longitude: position.x(),
                        elevation: point.elevation,
                        speed: point.speed,
                    });
                }
            }
        }

        if fixes.is_empty() {
            return Err(TelemetryError::Parse(
                "track log contains no timed fixes".to_string(),
            ));
        }

        let trace = Self::from_fixes(start, fixes);
        tracing::info!(
            "Parsed track log: {} fixes starting {}",
            trace.len(),
            trace
                .start
                .map(|s| s.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(trace)
    }

    pub fn parse_str(input: &str) -> Result<Self, TelemetryError> {
        Self::parse(input.as_bytes())
    }

    pub fn start(&self) -> Result<DateTime<Utc>, TelemetryError> {
        self.start.ok_or(TelemetryError::EmptyTrace)
    }

    pub fn fixes(&self) -> &[TelemetryFix] {
        &self.fixes
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

fn gpx_time_to_utc(time: gpx::Time) -> Result<DateTime<Utc>, TelemetryError> {
    let iso = time
        .format()
        .map_err(|e| TelemetryError::Parse(e.to_string()))?;
    let parsed = DateTime::parse_from_rfc3339(&iso)
        .map_err(|e| TelemetryError::Parse(e.to_string()))?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_564_800 + secs, 0).unwrap()
    }

    pub(crate) fn fix(secs: i64, lat: f64, lon: f64) -> TelemetryFix {
        TelemetryFix {
            timestamp: at(secs),
            latitude: lat,
            longitude: lon,
            elevation: None,
            speed: None,
        }
    }

    pub(crate) const SAMPLE_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="dashcam" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata>
    <time>2024-05-01T12:00:00Z</time>
  </metadata>
  <trk>
    <trkseg>
      <trkpt lat="35.2000" lon="-80.8000"><ele>210.5</ele><time>2024-05-01T12:00:10.600Z</time></trkpt>
      <trkpt lat="35.1000" lon="-80.9000"><ele>200.0</ele><time>2024-05-01T12:00:00.250Z</time></trkpt>
      <trkpt lat="35.1500" lon="-80.8500"><time>2024-05-01T12:00:05.000Z</time></trkpt>
      <trkpt lat="35.1501" lon="-80.8501"><time>2024-05-01T12:00:05.900Z</time></trkpt>
      <trkpt lat="35.3000" lon="-80.7000"></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_parse_gpx_sorts_truncates_and_dedups() {
        let trace = TelemetryTrace::parse_str(SAMPLE_GPX).unwrap();
        assert_eq!(trace.start().unwrap(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        let times: Vec<_> = trace.fixes().iter().map(|f| f.timestamp).collect();
        assert_eq!(
            times,
            vec![
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap(),
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap(),
            ]
        );
        // 12:00:05.900 collapses into the earlier 12:00:05 fix
        assert_eq!(trace.fixes()[1].latitude, 35.15);
        assert_eq!(trace.fixes()[0].elevation, Some(200.0));
        assert_eq!(trace.fixes()[2].point().x(), -80.8);
    }

    #[test]
    fn test_parse_rejects_garbage_and_untimed_logs() {
        assert_matches!(
            TelemetryTrace::parse_str("not a gpx file"),
            Err(TelemetryError::Parse(_))
        );

        let untimed = r#"<?xml version="1.0"?>
<gpx version="1.1" creator="dashcam" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg><trkpt lat="35.0" lon="-80.0"></trkpt></trkseg></trk>
</gpx>"#;
        assert_matches!(
            TelemetryTrace::parse_str(untimed),
            Err(TelemetryError::Parse(msg)) if msg.contains("no timed fixes")
        );
    }

    #[test]
    fn test_from_fixes_is_stable_for_duplicates() {
        let trace = TelemetryTrace::from_fixes(
            None,
            vec![fix(20, 3.0, 3.0), fix(10, 1.0, 1.0), fix(10, 2.0, 2.0)],
        );
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.fixes()[0].latitude, 1.0);
        assert_eq!(trace.start().unwrap(), at(10));
    }

    #[test]
    fn test_empty_trace_has_no_start() {
        let trace = TelemetryTrace::from_fixes(None, Vec::new());
        assert!(trace.is_empty());
        assert_matches!(trace.start(), Err(TelemetryError::EmptyTrace));
    }
}
