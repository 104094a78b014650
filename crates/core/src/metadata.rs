use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A single tag value as handed out by a [`MetadataSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    /// Structured value, e.g. a person name split into its components.
    Composite(BTreeMap<String, TagValue>),
    Bytes(Vec<u8>),
}

impl TagValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Composite(_) => "composite",
            Self::Bytes(_) => "binary",
        }
    }

    /// String form of scalar values; `None` for composite and binary values.
    pub fn as_scalar_string(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Integer(n) => Some(n.to_string()),
            Self::Decimal(n) => Some(n.to_string()),
            Self::Composite(_) | Self::Bytes(_) => None,
        }
    }

    pub fn component(&self, name: &str) -> Option<&TagValue> {
        match self {
            Self::Composite(fields) => fields.get(name),
            _ => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Tag name to value mapping for one file. Read fresh per file, never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagMap(BTreeMap<String, TagValue>);

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, value: impl Into<TagValue>) {
        self.0.insert(tag.into(), value.into());
    }

    pub fn get(&self, tag: &str) -> Option<&TagValue> {
        self.0.get(tag)
    }

    /// Scalar value of `tag` as a trimmed, non-empty string.
    pub fn scalar(&self, tag: &str) -> Option<String> {
        self.get(tag)
            .and_then(TagValue::as_scalar_string)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl FromIterator<(String, TagValue)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (String, TagValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Builds a person-name composite from `family` and `given` components.
pub fn person_name(family: &str, given: &str) -> TagValue {
    let mut fields = BTreeMap::new();
    fields.insert(FAMILY_NAME.to_string(), TagValue::from(family));
    fields.insert(GIVEN_NAME.to_string(), TagValue::from(given));
    TagValue::Composite(fields)
}

pub const FAMILY_NAME: &str = "FamilyName";
pub const GIVEN_NAME: &str = "GivenName";

/// Capability the engine needs from an image-format decoder.
pub trait MetadataSource {
    /// Cheap check whether `path` looks like a metadata-bearing image file.
    fn is_image_file(&self, path: &Path) -> bool;

    /// Reads every known tag of `path`. Fails with
    /// [`EngineError::UnreadableMetadata`](crate::EngineError::UnreadableMetadata)
    /// when the file is not a valid image file.
    fn read_tags(&self, path: &Path) -> EngineResult<TagMap>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_trims_and_drops_empty() {
        let mut tags = TagMap::new();
        tags.insert("SeriesDescription", "  T1 MPRAGE ");
        tags.insert("StudyComments", "   ");
        tags.insert("SeriesNumber", 3);

        assert_eq!(tags.scalar("SeriesDescription").as_deref(), Some("T1 MPRAGE"));
        assert_eq!(tags.scalar("StudyComments"), None);
        assert_eq!(tags.scalar("SeriesNumber").as_deref(), Some("3"));
        assert_eq!(tags.scalar("Missing"), None);
    }

    #[test]
    fn composite_values_are_not_scalars() {
        let mut tags = TagMap::new();
        tags.insert("PatientName", person_name("Doe", "Jane"));
        let name = tags.get("PatientName").expect("present");
        assert_eq!(name.as_scalar_string(), None);
        assert_eq!(name.kind(), "composite");
        assert_eq!(name.component(FAMILY_NAME), Some(&TagValue::from("Doe")));
    }

    #[test]
    fn json_round_trip_keeps_variants() {
        let raw = r#"{"SeriesNumber": 3, "SliceThickness": 1.5, "PatientName": {"FamilyName": "Doe", "GivenName": "Jane"}}"#;
        let tags: TagMap = serde_json::from_str(raw).expect("parse");
        assert_eq!(tags.get("SeriesNumber"), Some(&TagValue::Integer(3)));
        assert_eq!(tags.get("SliceThickness"), Some(&TagValue::Decimal(1.5)));
        assert!(matches!(tags.get("PatientName"), Some(TagValue::Composite(_))));
    }
}
