use crate::error::{EngineError, EngineResult};
use crate::metadata::{TagMap, TagValue, FAMILY_NAME, GIVEN_NAME};
use crate::sanitize::{sanitize_string, sanitize_value};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

const PATIENT_NAME: &str = "PatientName";
const STUDY_DATE: &str = "StudyDate";

/// Person-name tags reduced to their family name.
const PHYSICIAN_TAGS: &[&str] = &[
    "ReferringPhysicianName",
    "OperatorName",
    "PerformingPhysicianName",
    "RequestingPhysician",
];

const COMMENT_TAGS: &[&str] = &["ImageComments", "StudyComments"];

/// Ordered list of tag names, written as `"Tag;Tag;Tag"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NamingRule {
    tags: Vec<String>,
}

impl NamingRule {
    pub fn parse(raw: &str) -> Self {
        let tags = raw
            .split(';')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl FromStr for NamingRule {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for NamingRule {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<NamingRule> for String {
    fn from(value: NamingRule) -> Self {
        value.to_string()
    }
}

impl fmt::Display for NamingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tags.join(";"))
    }
}

/// Renders `rule` against `metadata` into one sanitized name segment.
///
/// Missing tags contribute nothing and are reported through `log::warn!`;
/// composite or binary values on tags that are not person names fail with
/// [`EngineError::UnsupportedTagValue`].
pub fn evaluate(metadata: &TagMap, rule: &NamingRule, upper_case: bool) -> EngineResult<String> {
    if rule.is_empty() {
        return Ok(String::new());
    }

    let mut out = String::new();
    for (index, tag) in rule.tags().iter().enumerate() {
        if index > 0 {
            out.push('_');
        }
        let value = match resolve_tag(metadata, tag)? {
            Some(value) => value,
            None => {
                report_missing(metadata, tag);
                String::new()
            }
        };
        out.push_str(&sanitize_value(&value));
    }

    let cased = if upper_case {
        out.to_uppercase()
    } else {
        out.to_lowercase()
    };
    Ok(sanitize_string(&cased))
}

fn resolve_tag(metadata: &TagMap, tag: &str) -> EngineResult<Option<String>> {
    let Some(value) = metadata.get(tag) else {
        return Ok(None);
    };

    let resolved = match value {
        TagValue::Composite(_) if tag == PATIENT_NAME => format!(
            "{}_{}",
            component(value, tag, FAMILY_NAME)?,
            component(value, tag, GIVEN_NAME)?
        ),
        TagValue::Composite(_) if PHYSICIAN_TAGS.contains(&tag) => {
            component(value, tag, FAMILY_NAME)?
        }
        other => scalar(other, tag)?,
    };
    Ok(Some(resolved))
}

fn component(value: &TagValue, tag: &str, name: &str) -> EngineResult<String> {
    match value.component(name) {
        Some(inner) => scalar(inner, tag),
        None => Ok(String::new()),
    }
}

fn scalar(value: &TagValue, tag: &str) -> EngineResult<String> {
    value
        .as_scalar_string()
        .ok_or_else(|| EngineError::UnsupportedTagValue {
            tag: tag.to_string(),
            kind: value.kind(),
        })
}

fn report_missing(metadata: &TagMap, tag: &str) {
    let patient = resolve_tag(metadata, PATIENT_NAME)
        .ok()
        .flatten()
        .filter(|name| !name.trim_matches('_').is_empty())
        .unwrap_or_else(|| "unknown patient".to_string());
    let date = metadata
        .scalar(STUDY_DATE)
        .unwrap_or_else(|| "an unknown date".to_string());

    if COMMENT_TAGS.contains(&tag) {
        log::warn!("The study comment is missing for image taken on {date} for {patient}");
    } else {
        log::warn!("The {tag} is missing for image taken on {date} for {patient}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::person_name;
    use crate::sanitize::is_banned;
    use crate::testing::capture_warnings;

    fn sample() -> TagMap {
        let mut tags = TagMap::new();
        tags.insert("SeriesDescription", "T1 MPRAGE");
        tags.insert("SeriesNumber", 3);
        tags.insert("PatientName", person_name("Doe", "Jane"));
        tags.insert("StudyDate", "20200101");
        tags
    }

    #[test]
    fn parse_splits_on_semicolons_and_drops_blanks() {
        let rule = NamingRule::parse(" StudyDescription ;; RequestingPhysician;");
        assert_eq!(rule.tags(), ["StudyDescription", "RequestingPhysician"]);
        assert_eq!(rule.to_string(), "StudyDescription;RequestingPhysician");
        assert!(NamingRule::parse("").is_empty());
    }

    #[test]
    fn empty_rule_renders_empty_string() {
        let rendered = evaluate(&sample(), &NamingRule::default(), true).expect("evaluate");
        assert_eq!(rendered, "");
    }

    #[test]
    fn simple_rule_is_sanitized_and_upper_cased() {
        let rendered =
            evaluate(&sample(), &NamingRule::parse("SeriesDescription"), true).expect("evaluate");
        assert_eq!(rendered, "T1_MPRAGE");
    }

    #[test]
    fn lower_case_flag_lowers_the_result() {
        let rendered =
            evaluate(&sample(), &NamingRule::parse("SeriesDescription"), false).expect("evaluate");
        assert_eq!(rendered, "t1_mprage");
    }

    #[test]
    fn tags_are_joined_and_numbers_rendered_in_decimal() {
        let rule = NamingRule::parse("PatientName;SeriesNumber;StudyDate");
        let rendered = evaluate(&sample(), &rule, true).expect("evaluate");
        assert_eq!(rendered, "DOE_JANE_3_20200101");
    }

    #[test]
    fn physician_names_reduce_to_family_name() {
        let mut tags = sample();
        tags.insert("ReferringPhysicianName", person_name("House", "Gregory"));
        let rendered = evaluate(&tags, &NamingRule::parse("ReferringPhysicianName"), true)
            .expect("evaluate");
        assert_eq!(rendered, "HOUSE");
    }

    #[test]
    fn missing_tag_contributes_empty_value() {
        let rule = NamingRule::parse("RequestingPhysician;SeriesDescription");
        let (rendered, warnings) = capture_warnings(|| evaluate(&sample(), &rule, true));
        assert_eq!(rendered.expect("missing tags never fail"), "_T1_MPRAGE");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("RequestingPhysician"));
        assert!(warnings[0].contains("20200101"));
        assert!(warnings[0].contains("Doe_Jane"));
    }

    #[test]
    fn missing_comments_do_not_fail() {
        let rule = NamingRule::parse("StudyComments");
        let (rendered, warnings) = capture_warnings(|| evaluate(&sample(), &rule, true));
        assert_eq!(rendered.expect("evaluate"), "");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("study comment"));
        assert!(warnings[0].contains("20200101"));
        assert!(warnings[0].contains("Doe_Jane"));
    }

    #[test]
    fn present_tags_log_nothing() {
        let rule = NamingRule::parse("PatientName;SeriesDescription");
        let (_, warnings) = capture_warnings(|| evaluate(&sample(), &rule, true));
        assert!(warnings.is_empty());
    }

    #[test]
    fn binary_values_are_rejected() {
        let mut tags = sample();
        tags.insert("ImageType", TagValue::Bytes(vec![1, 2, 3]));
        let err = evaluate(&tags, &NamingRule::parse("ImageType"), true).expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::UnsupportedTagValue { kind: "binary", .. }
        ));
    }

    #[test]
    fn composite_on_plain_tag_is_rejected() {
        let mut tags = sample();
        tags.insert("SeriesDescription", person_name("a", "b"));
        let err =
            evaluate(&tags, &NamingRule::parse("SeriesDescription"), true).expect_err("must fail");
        assert!(matches!(err, EngineError::UnsupportedTagValue { .. }));
    }

    #[test]
    fn output_never_contains_banned_chars() {
        let mut tags = TagMap::new();
        tags.insert("SeriesDescription", "[t1] {ax} (fs) <3 #1 $ % & * ~ ! @");
        let rendered =
            evaluate(&tags, &NamingRule::parse("SeriesDescription"), true).expect("evaluate");
        assert!(!rendered.chars().any(is_banned));
        assert_eq!(sanitize_string(&rendered), rendered);
    }
}
