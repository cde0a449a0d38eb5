use crate::pipeline::assemble::Summary;
use crate::pipeline::batching::BatchReport;
use crate::pipeline::geometry::FeatureCollection;
use crate::pipeline::run_state::RunStatus;
use crate::pipeline::types::FrameRecord;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const FRAMES_JSON: &str = "frames.json";
pub const FRAMES_CSV: &str = "frames.csv";
pub const FRAMES_GEOJSON: &str = "frames.geojson";
pub const OVERVIEW_JSON: &str = "overview.json";
pub const RUN_STATUS_JSON: &str = "run_status.json";
pub const COMBINED_GEOJSON: &str = "all_frames.geojson";

/// How much footage the analyzed frames stand for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    pub analyzed_frames: usize,
    pub seconds: f64,
    pub minutes: f64,
}

impl Coverage {
    /// `frames_per_second` is the extraction rate, not the video's.
    pub fn new(analyzed_frames: usize, frames_per_second: f64) -> Self {
        let seconds = if frames_per_second > 0.0 {
            (analyzed_frames as f64 / frames_per_second).round()
        } else {
            0.0
        };
        Self {
            analyzed_frames,
            seconds,
            minutes: (seconds / 60.0).floor(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Overview<'a> {
    pub run_id: &'a str,
    pub summary: &'a Summary,
    pub batches: &'a BatchReport,
    pub coverage: Coverage,
    pub feature_count: usize,
    pub route_length_m: f64,
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

/// Writes frames.json, frames.geojson, frames.csv and overview.json.
pub fn write_run_artifacts(
    output_dir: &Path,
    records: &[FrameRecord],
    features: &FeatureCollection,
    overview: &Overview<'_>,
) -> Result<()> {
    write_json(&output_dir.join(FRAMES_JSON), records)?;
    write_json(&output_dir.join(FRAMES_GEOJSON), features)?;
    write_frames_csv(&output_dir.join(FRAMES_CSV), records)?;
    write_json(&output_dir.join(OVERVIEW_JSON), overview)?;
    tracing::info!(
        "Wrote {} frames ({} features) to {:?}",
        records.len(),
        features.len(),
        output_dir
    );
    Ok(())
}

pub fn write_run_status(output_dir: &Path, status: &RunStatus) -> Result<()> {
    write_json(&output_dir.join(RUN_STATUS_JSON), status)
}

/// One row per frame; condition columns follow the first analyzed frame.
pub fn write_frames_csv(path: &Path, records: &[FrameRecord]) -> Result<()> {
    let condition_names: Vec<&'static str> = records
        .iter()
        .find_map(|r| r.payload())
        .map(|p| p.conditions().into_iter().map(|c| c.name).collect())
        .unwrap_or_default();

    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<String> = [
        "filename",
        "timestamp",
        "relative_timestamp_secs",
        "latitude",
        "longitude",
        "status",
        "health_score",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for name in &condition_names {
        header.push(name.to_string());
        header.push(format!("{}_score", name));
    }
    header.push("summary".to_string());
    writer.write_record(&header)?;

    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for record in records {
        let mut row = vec![
            record.filename.clone(),
            record
                .absolute_timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            record.relative_timestamp_secs.to_string(),
            opt(record.latitude),
            opt(record.longitude),
        ];
        match record.payload() {
            Some(payload) => {
                row.push("complete".to_string());
                row.push(payload.health_score().to_string());
                let conditions = payload.conditions();
                for name in &condition_names {
                    match conditions.iter().find(|c| c.name == *name) {
                        Some(c) => {
                            row.push(if c.detected { "yes" } else { "no" }.to_string());
                            row.push(opt(c.confidence.or(c.severity.map(f64::from))));
                        }
                        None => row.extend([String::new(), String::new()]),
                    }
                }
                row.push(payload.summary().to_string());
            }
            None => {
                row.push("pending".to_string());
                row.push(String::new());
                for _ in &condition_names {
                    row.extend([String::new(), String::new()]);
                }
                row.push(String::new());
            }
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Merges every run's frames.geojson under `output_root` into one collection
/// written at the root. Returns the output path and feature count.
pub fn combine_feature_collections(output_root: &Path) -> Result<(PathBuf, usize)> {
    let mut sources: Vec<PathBuf> = WalkDir::new(output_root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == FRAMES_GEOJSON)
        .map(|e| e.path().to_path_buf())
        .collect();
    sources.sort();

    let mut collections = Vec::with_capacity(sources.len());
    for source in &sources {
        let content = fs::read_to_string(source)?;
        match serde_json::from_str::<FeatureCollection>(&content) {
            Ok(fc) => collections.push(fc),
            Err(e) => tracing::warn!("Skipping unreadable {:?}: {}", source, e),
        }
    }

    let combined = FeatureCollection::merge(collections);
    let path = output_root.join(COMBINED_GEOJSON);
    write_json(&path, &combined)?;
    tracing::info!(
        "Combined {} collections into {:?} ({} features)",
        sources.len(),
        path,
        combined.len()
    );
    Ok((path, combined.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::road;
    use crate::pipeline::assemble::to_feature_collection;
    use crate::pipeline::types::AnalysisState;

    fn records() -> Vec<FrameRecord> {
        let mut done = FrameRecord::new(PathBuf::from("d_0001.jpg"), Path::new("d.mp4"), 0.0);
        done.analysis = AnalysisState::Complete(road(64, 0.92));
        done.latitude = Some(35.0);
        done.longitude = Some(-80.0);
        let pending = FrameRecord::new(PathBuf::from("d_0002.jpg"), Path::new("d.mp4"), 2.0);
        vec![done, pending]
    }

    #[test]
    fn test_coverage() {
        let coverage = Coverage::new(90, 0.5);
        assert_eq!(coverage.seconds, 180.0);
        assert_eq!(coverage.minutes, 3.0);
        assert_eq!(Coverage::new(10, 0.0).seconds, 0.0);
    }

    #[test]
    fn test_frames_csv_has_condition_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FRAMES_CSV);
        write_frames_csv(&path, &records()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[7], "pothole");
        assert_eq!(&headers[8], "pothole_score");
        assert_eq!(headers.len(), 7 + 8 + 1);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[0][5], "complete");
        assert_eq!(&rows[0][7], "yes");
        assert_eq!(&rows[0][8], "0.92");
        assert_eq!(&rows[1][5], "pending");
        assert_eq!(&rows[1][6], "");
    }

    #[test]
    fn test_combine_feature_collections() {
        let root = tempfile::tempdir().unwrap();
        for run in ["a_run", "b_run"] {
            let dir = root.path().join(run);
            fs::create_dir_all(&dir).unwrap();
            let fc = to_feature_collection(&records()).unwrap();
            write_json(&dir.join(FRAMES_GEOJSON), &fc).unwrap();
        }
        fs::write(root.path().join("c_run.geojson"), "ignored").unwrap();

        let (path, count) = combine_feature_collections(root.path()).unwrap();
        assert_eq!(count, 2);
        let combined: FeatureCollection =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(combined.len(), 2);
    }
}
