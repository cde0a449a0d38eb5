// Summary statistics and map output for a finished run

use crate::config::HealthBucket;
use crate::error::AssemblyError;
use crate::pipeline::geometry::{Feature, FeatureCollection};
use crate::pipeline::types::FrameRecord;
use geo_types::Point;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionStats {
    /// Frames where the condition was reported present
    pub detected: usize,
    /// Frames whose analysis reports on the condition at all
    pub observed: usize,
    pub mean_confidence: Option<f64>,
    pub mean_severity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthHistogram {
    pub bins: Vec<HistogramBin>,
    /// Scores that fell in no bucket
    pub out_of_range: usize,
}

impl HealthHistogram {
    pub fn new(buckets: &[HealthBucket]) -> Self {
        Self {
            bins: buckets
                .iter()
                .map(|b| HistogramBin {
                    label: b.label.clone(),
                    min: b.min,
                    max: b.max,
                    count: 0,
                })
                .collect(),
            out_of_range: 0,
        }
    }

    /// Counts `score` in the first bucket containing it.
    pub fn record(&mut self, score: f64) {
        match self
            .bins
            .iter_mut()
            .find(|b| score >= b.min && score <= b.max)
        {
            Some(bin) => bin.count += 1,
            None => self.out_of_range += 1,
        }
    }
}

/// A frame confident enough to raise a work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedFrame {
    pub filename: String,
    pub conditions: Vec<String>,
    pub max_confidence: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_frames: usize,
    pub analyzed_frames: usize,
    pub pending_frames: usize,
    pub conditions: BTreeMap<String, ConditionStats>,
    pub health_histogram: HealthHistogram,
    pub mean_health_score: Option<f64>,
    pub flagged_frames: Vec<FlaggedFrame>,
}

#[derive(Default)]
struct Accumulator {
    detected: usize,
    observed: usize,
    confidence_sum: f64,
    confidence_n: usize,
    severity_sum: f64,
    severity_n: usize,
}

fn mean(sum: f64, n: usize) -> Option<f64> {
    (n > 0).then(|| sum / n as f64)
}

/// Counts, mean confidence per condition and the health histogram over the
/// analyzed records. Pending records only count toward the totals.
pub fn summarize(records: &[FrameRecord], buckets: &[HealthBucket], flag_threshold: f64) -> Summary {
    let mut acc: BTreeMap<&'static str, Accumulator> = BTreeMap::new();
    let mut histogram = HealthHistogram::new(buckets);
    let mut health_sum = 0.0;
    let mut analyzed = 0;
    let mut flagged_frames = Vec::new();

    for record in records {
        let Some(payload) = record.payload() else {
            continue;
        };
        analyzed += 1;

        let score = payload.health_score();
        health_sum += score;
        histogram.record(score);

        let mut flagged_conditions = Vec::new();
        let mut max_confidence: f64 = 0.0;
        for condition in payload.conditions() {
            let entry = acc.entry(condition.name).or_default();
            entry.observed += 1;
            if condition.detected {
                entry.detected += 1;
            }
            if let Some(confidence) = condition.confidence {
                entry.confidence_sum += confidence;
                entry.confidence_n += 1;
                if condition.detected && confidence >= flag_threshold {
                    flagged_conditions.push(condition.name.to_string());
                    max_confidence = max_confidence.max(confidence);
                }
            }
            if let Some(severity) = condition.severity {
                entry.severity_sum += severity as f64;
                entry.severity_n += 1;
            }
        }

        if !flagged_conditions.is_empty() {
            flagged_frames.push(FlaggedFrame {
                filename: record.filename.clone(),
                conditions: flagged_conditions,
                max_confidence,
                latitude: record.latitude,
                longitude: record.longitude,
            });
        }
    }

    let conditions = acc
        .into_iter()
        .map(|(name, a)| {
            (
                name.to_string(),
                ConditionStats {
                    detected: a.detected,
                    observed: a.observed,
                    mean_confidence: mean(a.confidence_sum, a.confidence_n),
                    mean_severity: mean(a.severity_sum, a.severity_n),
                },
            )
        })
        .collect();

    Summary {
        total_frames: records.len(),
        analyzed_frames: analyzed,
        pending_frames: records.len() - analyzed,
        conditions,
        health_histogram: histogram,
        mean_health_score: mean(health_sum, analyzed),
        flagged_frames,
    }
}

fn feature_properties(record: &FrameRecord) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("filename".into(), Value::from(record.filename.clone()));
    props.insert(
        "filepath".into(),
        Value::from(record.filepath.to_string_lossy().into_owned()),
    );
    props.insert(
        "source_video".into(),
        Value::from(record.source_video.to_string_lossy().into_owned()),
    );
    props.insert(
        "relative_timestamp_secs".into(),
        Value::from(record.relative_timestamp_secs),
    );
    props.insert(
        "timestamp".into(),
        record
            .absolute_timestamp
            .map(|t| Value::from(t.to_rfc3339()))
            .unwrap_or(Value::Null),
    );
    for (key, slot) in [
        ("external_analysis_file_id", &record.external_analysis_file_id),
        ("archive_file_id", &record.archive_file_id),
        ("archive_url", &record.archive_url),
    ] {
        props.insert(key.into(), slot.clone().map(Value::from).unwrap_or(Value::Null));
    }
    if let Some(Value::Object(analysis)) = record.payload().and_then(|p| serde_json::to_value(p).ok()) {
        props.extend(analysis);
    }
    props
}

/// One point per analyzed record. Pending records are left out; an analyzed
/// record without a position is an error.
pub fn to_feature_collection(records: &[FrameRecord]) -> Result<FeatureCollection, AssemblyError> {
    let mut features = Vec::new();
    for record in records.iter().filter(|r| r.is_analyzed()) {
        let (lat, lon) = record
            .coordinates()
            .ok_or_else(|| AssemblyError::MissingCoordinates(record.filename.clone()))?;
        features.push(Feature::point(Point::new(lon, lat), feature_properties(record)));
    }
    Ok(FeatureCollection::new(features))
}
