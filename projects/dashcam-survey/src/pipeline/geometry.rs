use geo::HaversineLength;
use geo_types::{LineString, Point};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// GeoJSON point; coordinates are `[longitude, latitude]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl From<Point<f64>> for PointGeometry {
    fn from(p: Point<f64>) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [p.x(), p.y()],
        }
    }
}

impl PointGeometry {
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.coordinates[0], self.coordinates[1])
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PointGeometry,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn point(point: Point<f64>, properties: Map<String, Value>) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry: point.into(),
            properties,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Haversine length in metres of the path through the features, in order.
    pub fn route_length_m(&self) -> f64 {
        if self.features.len() < 2 {
            return 0.0;
        }
        let line: LineString<f64> = self
            .features
            .iter()
            .map(|f| f.geometry.to_point())
            .collect::<Vec<_>>()
            .into();
        line.haversine_length()
    }

    /// Concatenates collections, keeping each one's feature order.
    pub fn merge<I>(collections: I) -> Self
    where
        I: IntoIterator<Item = FeatureCollection>,
    {
        Self::new(collections.into_iter().flat_map(|c| c.features).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(lon: f64, lat: f64, name: &str) -> Feature {
        let mut props = Map::new();
        props.insert("filename".to_string(), Value::from(name));
        Feature::point(Point::new(lon, lat), props)
    }

    #[test]
    fn test_point_geometry_is_lon_lat() {
        let geometry = PointGeometry::from(Point::new(-80.84, 35.22));
        let json = serde_json::to_value(&geometry).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"][0], -80.84);
        assert_eq!(json["coordinates"][1], 35.22);
        assert_eq!(geometry.to_point(), Point::new(-80.84, 35.22));
    }

    #[test]
    fn test_route_length_one_degree_of_latitude() {
        let fc = FeatureCollection::new(vec![feature(0.0, 0.0, "a"), feature(0.0, 1.0, "b")]);
        let length = fc.route_length_m();
        // ~111.2 km per degree on a 6371 km sphere
        assert!((length - 111_195.0).abs() < 200.0, "length was {}", length);
        assert_eq!(FeatureCollection::default().route_length_m(), 0.0);
    }

    #[test]
    fn test_merge_preserves_order() {
        let a = FeatureCollection::new(vec![feature(0.0, 0.0, "a1"), feature(0.0, 0.1, "a2")]);
        let b = FeatureCollection::new(vec![feature(1.0, 0.0, "b1")]);
        let merged = FeatureCollection::merge(vec![a, b]);
        let names: Vec<_> = merged
            .features
            .iter()
            .map(|f| f.properties["filename"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["a1", "a2", "b1"]);
        assert_eq!(serde_json::to_value(&merged).unwrap()["type"], "FeatureCollection");
    }
}
