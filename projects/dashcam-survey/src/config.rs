// Pipeline configuration
//
// Built once from the command line and passed by reference into every run.
// Nothing in the pipeline mutates it.

use crate::error::PipelineError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Pull frames at a fixed sampling rate
    Sampled,
    /// Keep every frame (time-lapse footage)
    AllFrames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSchema {
    RoadCondition,
    Greenway,
}

impl AnalysisSchema {
    /// Default health histogram: PCI-style bands for roads, PASER pairs for greenways.
    pub fn default_health_buckets(&self) -> Vec<HealthBucket> {
        let bands: &[(f64, f64)] = match self {
            AnalysisSchema::RoadCondition => &[
                (0.0, 19.0),
                (20.0, 39.0),
                (40.0, 59.0),
                (60.0, 79.0),
                (80.0, 100.0),
            ],
            AnalysisSchema::Greenway => &[(1.0, 2.0), (3.0, 4.0), (5.0, 6.0), (7.0, 8.0), (9.0, 10.0)],
        };
        bands
            .iter()
            .map(|&(min, max)| HealthBucket::new(min, max))
            .collect()
    }
}

/// Inclusive score range used by the health histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthBucket {
    pub label: String,
    pub min: f64,
    pub max: f64,
}

impl HealthBucket {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            label: format!("{}-{}", min, max),
            min,
            max,
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }

    /// Parses a comma separated list such as `0-19,20-39,40-100`.
    pub fn parse_list(input: &str) -> Result<Vec<HealthBucket>, PipelineError> {
        let mut buckets = Vec::new();
        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (min, max) = part.split_once('-').ok_or_else(|| {
                PipelineError::InvalidConfig(format!("health bucket '{}' is not min-max", part))
            })?;
            let parse = |v: &str| {
                v.trim().parse::<f64>().map_err(|_| {
                    PipelineError::InvalidConfig(format!("health bucket '{}' has a bad bound", part))
                })
            };
            let (min, max) = (parse(min)?, parse(max)?);
            if min > max {
                return Err(PipelineError::InvalidConfig(format!(
                    "health bucket '{}' has min above max",
                    part
                )));
            }
            buckets.push(HealthBucket::new(min, max));
        }
        if buckets.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one health bucket is required".to_string(),
            ));
        }
        Ok(buckets)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 6,
            max_concurrent_batches: 20,
            timeout: Duration::from_secs(300),
        }
    }
}

impl BatchSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(PipelineError::InvalidConfig(
                "max concurrent batches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub mode: ExtractionMode,
    /// Frames per second to keep in sampled mode
    pub sample_rate: f64,
    pub max_frames: Option<usize>,
    /// Real-world seconds between consecutive frames in all-frames mode
    pub seconds_per_frame: f64,
    /// Pixels removed from the top of each frame (dashboard, hood)
    pub crop_top: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Sampled,
            sample_rate: 0.5,
            max_frames: None,
            seconds_per_frame: 1.0,
            crop_top: 0,
        }
    }
}

impl ExtractionSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.sample_rate > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        if !(self.seconds_per_frame > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "seconds per frame must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_root: PathBuf,
    pub batch: BatchSettings,
    pub extraction: ExtractionSettings,
    pub schema: AnalysisSchema,
    pub health_buckets: Vec<HealthBucket>,
    /// Minimum confidence for a detected condition to flag a frame
    pub flag_confidence_threshold: f64,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn new(output_root: PathBuf, schema: AnalysisSchema) -> Self {
        Self {
            output_root,
            batch: BatchSettings::default(),
            extraction: ExtractionSettings::default(),
            schema,
            health_buckets: schema.default_health_buckets(),
            flag_confidence_threshold: 0.9,
            show_progress: false,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.batch.validate()?;
        self.extraction.validate()?;
        if self.health_buckets.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one health bucket is required".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.flag_confidence_threshold) {
            return Err(PipelineError::InvalidConfig(
                "flag confidence threshold must be within 0..=1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_health_buckets() {
        let buckets = HealthBucket::parse_list("0-19, 20-39,40-100").unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[1].label, "20-39");
        assert!(buckets[2].contains(100.0));
        assert!(!buckets[0].contains(19.5));

        assert_matches!(
            HealthBucket::parse_list("10"),
            Err(PipelineError::InvalidConfig(_))
        );
        assert_matches!(
            HealthBucket::parse_list("40-20"),
            Err(PipelineError::InvalidConfig(_))
        );
        assert_matches!(HealthBucket::parse_list(""), Err(PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_default_buckets_per_schema() {
        let road = AnalysisSchema::RoadCondition.default_health_buckets();
        assert_eq!(road.first().map(|b| b.label.as_str()), Some("0-19"));
        assert_eq!(road.last().map(|b| b.label.as_str()), Some("80-100"));

        let greenway = AnalysisSchema::Greenway.default_health_buckets();
        assert_eq!(greenway.len(), 5);
        assert!(greenway[4].contains(10.0));
    }

    #[test]
    fn test_validate_rejects_zero_batching() {
        let mut config = PipelineConfig::new(PathBuf::from("out"), AnalysisSchema::RoadCondition);
        assert!(config.validate().is_ok());

        config.batch.batch_size = 0;
        assert_matches!(config.validate(), Err(PipelineError::InvalidConfig(_)));

        config.batch.batch_size = 3;
        config.batch.max_concurrent_batches = 0;
        assert_matches!(config.validate(), Err(PipelineError::InvalidConfig(_)));
    }
}
