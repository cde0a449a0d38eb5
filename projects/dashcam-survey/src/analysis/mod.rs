// Visual analysis boundary
//
// Raw service responses are decoded and validated here, once, into the
// AnalysisPayload union. Nothing downstream touches untyped JSON.

pub mod command;

use crate::config::AnalysisSchema;
use crate::error::BatchAnalysisError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One frame as submitted to the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub artifact_path: PathBuf,
}

/// One decoded result, keyed by the submitted frame id.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub id: String,
    pub payload: AnalysisPayload,
    /// Identifier the service assigned to the uploaded frame, if any
    pub external_file_id: Option<String>,
}

pub trait AnalysisService: Send + Sync {
    fn analyze(&self, batch: &[BatchItem]) -> Result<Vec<FrameAnalysis>, BatchAnalysisError>;
}

/// Closures with the right signature work as analysis services.
impl<F> AnalysisService for F
where
    F: Fn(&[BatchItem]) -> Result<Vec<FrameAnalysis>, BatchAnalysisError> + Send + Sync,
{
    fn analyze(&self, batch: &[BatchItem]) -> Result<Vec<FrameAnalysis>, BatchAnalysisError> {
        self(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detection {
    #[serde(alias = "Yes", alias = "YES")]
    Yes,
    #[serde(alias = "No", alias = "NO")]
    No,
}

impl Detection {
    pub fn is_yes(self) -> bool {
        self == Detection::Yes
    }
}

/// Paved-road defect assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadCondition {
    pub pothole: Detection,
    pub pothole_confidence: f64,
    pub alligator_cracking: Detection,
    pub alligator_cracking_confidence: f64,
    pub line_cracking: Detection,
    pub line_cracking_confidence: f64,
    pub debris: Detection,
    pub debris_confidence: f64,
    pub summary: String,
    /// 0 (failed) to 100 (perfect)
    pub road_health_index: u32,
}

/// Trail/greenway assessment: PASER rating plus 0-10 severities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenwayCondition {
    #[serde(rename = "PASER_rating", alias = "paser_rating")]
    pub paser_rating: u32,
    pub line_cracking: u32,
    pub longitudinal_cracking: u32,
    pub raveling: u32,
    pub upheaval: u32,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum AnalysisPayload {
    RoadCondition(RoadCondition),
    Greenway(GreenwayCondition),
}

/// A single named condition as reported in a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionObservation {
    pub name: &'static str,
    pub detected: bool,
    /// Only the road schema reports confidences
    pub confidence: Option<f64>,
    /// Only the greenway schema reports severities
    pub severity: Option<u32>,
}

impl AnalysisPayload {
    /// Decodes one response entry under `schema` and range-checks it.
    pub fn decode(
        schema: AnalysisSchema,
        value: serde_json::Value,
    ) -> Result<Self, BatchAnalysisError> {
        let malformed = |e: serde_json::Error| BatchAnalysisError::MalformedResponse(e.to_string());
        let payload = match schema {
            AnalysisSchema::RoadCondition => {
                AnalysisPayload::RoadCondition(serde_json::from_value(value).map_err(malformed)?)
            }
            AnalysisSchema::Greenway => {
                AnalysisPayload::Greenway(serde_json::from_value(value).map_err(malformed)?)
            }
        };
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<(), BatchAnalysisError> {
        let out_of_range = |field: &str, value: String| -> Result<(), BatchAnalysisError> {
            Err(BatchAnalysisError::MalformedResponse(format!(
                "{} out of range: {}",
                field, value
            )))
        };
        match self {
            AnalysisPayload::RoadCondition(road) => {
                for c in self.conditions() {
                    let confidence = c.confidence.unwrap_or_default();
                    if !(0.0..=1.0).contains(&confidence) {
                        return out_of_range(c.name, confidence.to_string());
                    }
                }
                if road.road_health_index > 100 {
                    return out_of_range("road_health_index", road.road_health_index.to_string());
                }
            }
            AnalysisPayload::Greenway(greenway) => {
                if !(1..=10).contains(&greenway.paser_rating) {
                    return out_of_range("PASER_rating", greenway.paser_rating.to_string());
                }
                for c in self.conditions() {
                    let severity = c.severity.unwrap_or_default();
                    if severity > 10 {
                        return out_of_range(c.name, severity.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    pub fn schema(&self) -> AnalysisSchema {
        match self {
            AnalysisPayload::RoadCondition(_) => AnalysisSchema::RoadCondition,
            AnalysisPayload::Greenway(_) => AnalysisSchema::Greenway,
        }
    }

    pub fn conditions(&self) -> Vec<ConditionObservation> {
        match self {
            AnalysisPayload::RoadCondition(r) => [
                ("pothole", r.pothole, r.pothole_confidence),
                ("alligator_cracking", r.alligator_cracking, r.alligator_cracking_confidence),
                ("line_cracking", r.line_cracking, r.line_cracking_confidence),
                ("debris", r.debris, r.debris_confidence),
            ]
            .into_iter()
            .map(|(name, detection, confidence)| ConditionObservation {
                name,
                detected: detection.is_yes(),
                confidence: Some(confidence),
                severity: None,
            })
            .collect(),
            AnalysisPayload::Greenway(g) => [
                ("line_cracking", g.line_cracking),
                ("longitudinal_cracking", g.longitudinal_cracking),
                ("raveling", g.raveling),
                ("upheaval", g.upheaval),
            ]
            .into_iter()
            .map(|(name, severity)| ConditionObservation {
                name,
                detected: severity > 0,
                confidence: None,
                severity: Some(severity),
            })
            .collect(),
        }
    }

    /// Road health index or PASER rating.
    pub fn health_score(&self) -> f64 {
        match self {
            AnalysisPayload::RoadCondition(r) => r.road_health_index as f64,
            AnalysisPayload::Greenway(g) => g.paser_rating as f64,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            AnalysisPayload::RoadCondition(r) => &r.summary,
            AnalysisPayload::Greenway(g) => &g.summary,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    analyses: Vec<serde_json::Value>,
}

/// Decodes a `{"analyses": [...]}` response body.
///
/// Any entry without a `file_id` or failing validation rejects the whole
/// response, so none of the batch is applied.
pub fn decode_analyses(
    schema: AnalysisSchema,
    body: &[u8],
) -> Result<Vec<FrameAnalysis>, BatchAnalysisError> {
    let response: AnalysisResponse = serde_json::from_slice(body)
        .map_err(|e| BatchAnalysisError::MalformedResponse(e.to_string()))?;

    response
        .analyses
        .into_iter()
        .enumerate()
        .map(|(pos, entry)| {
            let id = entry
                .get("file_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    BatchAnalysisError::MalformedResponse(format!("entry {} has no file_id", pos))
                })?;
            let external_file_id = entry
                .get("external_file_id")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let payload = AnalysisPayload::decode(schema, entry).map_err(|e| {
                BatchAnalysisError::MalformedResponse(format!("entry for {}: {}", id, e))
            })?;
            Ok(FrameAnalysis {
                id,
                payload,
                external_file_id,
            })
        })
        .collect()
}
