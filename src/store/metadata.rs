//! Metadata records kept in the `spatialdata_attrs` attribute of zarr groups.
//!
//! Every record is plain serde JSON. Transformations are stored as a list
//! of `{target_system, type, params}` entries, in the element's own order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::container::NamePolicy;
use crate::error::{Result, SpatialDataError};
use crate::model::{AnnotationTarget, ColumnType, ElementKind, TransformationMap};
use crate::transform::{CoordinateSystem, Transformation};

/// Version written to, and required in, the root record.
pub const FORMAT_VERSION: &str = "0.1";

/// The root descriptor. Written last; its presence marks a complete store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RootAttrs {
    pub format_version: String,
    pub elements: Vec<ElementEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coordinate_systems: Vec<CoordinateSystemRecord>,
    #[serde(default)]
    pub allow_cross_kind_names: bool,
}

impl RootAttrs {
    pub fn name_policy(&self) -> NamePolicy {
        if self.allow_cross_kind_names {
            NamePolicy::AllowCrossKind
        } else {
            NamePolicy::Exclusive
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementEntry {
    pub kind: ElementKind,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateSystemRecord {
    pub name: String,
    pub axes: Vec<String>,
}

impl From<&CoordinateSystem> for CoordinateSystemRecord {
    fn from(cs: &CoordinateSystem) -> Self {
        Self {
            name: cs.name.clone(),
            axes: cs.axis_names(),
        }
    }
}

impl CoordinateSystemRecord {
    pub fn to_coordinate_system(&self) -> Result<CoordinateSystem> {
        let axes: Vec<&str> = self.axes.iter().map(String::as_str).collect();
        CoordinateSystem::new(self.name.clone(), &axes)
    }
}

/// One entry of an element's transformation mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformationRecord {
    pub target_system: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl TransformationRecord {
    pub fn new(target_system: &str, t: &Transformation) -> Result<Self> {
        let mut tagged = serde_json::to_value(t).map_err(|source| SpatialDataError::MetadataWrite {
            path: format!("transformation to '{}'", target_system),
            source,
        })?;
        let params = tagged.get_mut("params").map(Value::take);
        Ok(Self {
            target_system: target_system.to_string(),
            kind: t.type_name().to_string(),
            params,
        })
    }

    /// Decodes and checks the stored transformation.
    pub fn transformation(&self, location: &str) -> Result<Transformation> {
        let mut tagged = serde_json::Map::new();
        tagged.insert("type".to_string(), Value::String(self.kind.clone()));
        if let Some(params) = &self.params {
            tagged.insert("params".to_string(), params.clone());
        }
        let t: Transformation =
            serde_json::from_value(Value::Object(tagged)).map_err(|source| SpatialDataError::MetadataParse {
                path: format!("{} (transformation to '{}')", location, self.target_system),
                source,
            })?;
        t.check().map_err(|e| SpatialDataError::incompatible(location, e.to_string()))?;
        Ok(t)
    }
}

/// Encodes a transformation mapping, preserving its order.
pub fn encode_transformations(map: &TransformationMap) -> Result<Vec<TransformationRecord>> {
    map.iter().map(|(target, t)| TransformationRecord::new(target, t)).collect()
}

pub fn decode_transformations(records: &[TransformationRecord], location: &str) -> Result<TransformationMap> {
    let mut map = TransformationMap::new();
    for record in records {
        if map.contains(&record.target_system) {
            return Err(SpatialDataError::incompatible(
                location,
                format!("duplicate transformation to '{}'", record.target_system),
            ));
        }
        map.insert(&record.target_system, record.transformation(location)?);
    }
    Ok(map)
}

/// One pyramid level of a stored raster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelRecord {
    /// Child group holding the level's array.
    pub path: String,
    pub transformations: Vec<TransformationRecord>,
}

/// A column of a stored table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

/// The attribute record of one element group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementAttrs {
    pub element_kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_coordinate_system: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub axes: Vec<String>,
    #[serde(default)]
    pub transformations: Vec<TransformationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiscale_levels: Option<Vec<LevelRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationTarget>,
    /// Schema of the table payload, or of per-geometry attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnRecord>>,
}

impl ElementAttrs {
    pub fn native(&self, location: &str) -> Result<&str> {
        self.native_coordinate_system
            .as_deref()
            .ok_or_else(|| SpatialDataError::incompatible(location, "missing native_coordinate_system"))
    }
}

/// Decodes a record read from `location`.
pub fn decode<T: serde::de::DeserializeOwned>(value: Value, location: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|source| SpatialDataError::MetadataParse {
        path: location.to_string(),
        source,
    })
}

/// Encodes a record destined for `location`.
pub fn encode<T: Serialize>(record: &T, location: &str) -> Result<Value> {
    serde_json::to_value(record).map_err(|source| SpatialDataError::MetadataWrite {
        path: location.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transformation_record_layout() {
        let t = Transformation::scale(&["x", "y"], &[2.0, 3.0]).unwrap();
        let record = TransformationRecord::new("global", &t).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["target_system"], "global");
        assert_eq!(value["type"], "scale");
        assert!(value["params"].is_object());
        assert_eq!(record.transformation("x").unwrap(), t);
    }

    #[test]
    fn test_identity_has_no_params() {
        let record = TransformationRecord::new("self", &Transformation::Identity).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"target_system": "self", "type": "identity"}));
        assert_eq!(record.transformation("x").unwrap(), Transformation::Identity);
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let record = TransformationRecord {
            target_system: "global".into(),
            kind: "warp".into(),
            params: None,
        };
        assert!(matches!(
            record.transformation("images/a"),
            Err(SpatialDataError::MetadataParse { .. })
        ));
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let record = TransformationRecord::new("global", &Transformation::Identity).unwrap();
        let err = decode_transformations(&[record.clone(), record], "points/p").unwrap_err();
        assert!(matches!(err, SpatialDataError::IncompatibleFormat { .. }));
    }

    #[test]
    fn test_element_attrs_round_trip() {
        let value = json!({
            "element_kind": "points",
            "native_coordinate_system": "global",
            "axes": ["x", "y"],
            "transformations": [
                {"target_system": "aligned", "type": "translation", "params": {"axes": ["x"], "vector": [1.0]}}
            ]
        });
        let attrs: ElementAttrs = decode(value.clone(), "points/p").unwrap();
        assert_eq!(attrs.element_kind, ElementKind::Points);
        assert_eq!(attrs.native("points/p").unwrap(), "global");
        let map = decode_transformations(&attrs.transformations, "points/p").unwrap();
        assert_eq!(map.targets(), vec!["aligned"]);
        assert_eq!(encode(&attrs, "points/p").unwrap(), value);
    }
}
