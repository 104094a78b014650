use crate::error::{EngineResult, IoContext};
use crate::metadata::TagMap;
use crate::rule::{evaluate, NamingRule};
use crate::sanitize::sanitize_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix value reserved by downstream tooling; a folder carrying it restarts at `_1`.
pub const LEGACY_SUFFIX_SENTINEL: i64 = -999;

/// One folder level: files are grouped by `main`; files sharing a folder
/// name and the same `common` value are split apart when their
/// `difference` values disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRule {
    pub main: NamingRule,
    #[serde(default)]
    pub difference: NamingRule,
    #[serde(default)]
    pub common: NamingRule,
    #[serde(default = "default_upper_case")]
    pub upper_case: bool,
}

fn default_upper_case() -> bool {
    true
}

impl LevelRule {
    pub fn new(main: &str, difference: &str, common: &str, upper_case: bool) -> Self {
        Self {
            main: NamingRule::parse(main),
            difference: NamingRule::parse(difference),
            common: NamingRule::parse(common),
            upper_case,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisambiguationEntry {
    pub difference: String,
    pub common: String,
    pub folder: PathBuf,
}

/// Append-only record of which (difference, common) signatures live in which
/// folder. Lives for exactly one classification level.
#[derive(Debug, Clone, Default)]
pub struct DisambiguationTable {
    entries: Vec<DisambiguationEntry>,
}

impl DisambiguationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the triple unless the (common, folder) pair is already known.
    pub fn record(&mut self, difference: &str, common: &str, folder: &Path) -> bool {
        let known = self
            .entries
            .iter()
            .any(|e| e.common == common && e.folder == folder);
        if known {
            return false;
        }
        self.entries.push(DisambiguationEntry {
            difference: difference.to_string(),
            common: common.to_string(),
            folder: folder.to_path_buf(),
        });
        true
    }

    /// Whether a file with this signature may join `folder`.
    pub fn allows(&self, difference: &str, common: &str, folder: &Path) -> bool {
        self.entries
            .iter()
            .any(|e| e.difference == difference && e.common == common && e.folder == folder)
    }

    pub fn entries(&self) -> &[DisambiguationEntry] {
        &self.entries
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub destination: PathBuf,
    pub created: bool,
}

/// Finds or creates the folder under `parent_dir` that a file with
/// `metadata` belongs to at this level.
pub fn classify(
    parent_dir: &Path,
    metadata: &TagMap,
    level: &LevelRule,
    table: &mut DisambiguationTable,
) -> EngineResult<Classification> {
    let base_name = evaluate(metadata, &level.main, level.upper_case)?;
    let difference = evaluate(metadata, &level.difference, level.upper_case)?;
    let common = evaluate(metadata, &level.common, level.upper_case)?;

    let mut name = base_name;
    loop {
        let candidate = sanitize_dir(&parent_dir.join(&name));
        table.record(&difference, &common, &candidate);

        if candidate.is_dir() {
            if level.difference.is_empty() || table.allows(&difference, &common, &candidate) {
                return Ok(Classification {
                    destination: candidate,
                    created: false,
                });
            }
        } else if !candidate.exists() {
            fs::create_dir(&candidate).at(&candidate)?;
            log::debug!("created folder {}", candidate.display());
            return Ok(Classification {
                destination: candidate,
                created: true,
            });
        }

        name = adjust_folder_name(&name);
    }
}

/// Bumps the trailing `_<n>` of a folder name, or appends `_1`.
pub fn adjust_folder_name(name: &str) -> String {
    if let Some((stem, suffix)) = name.rsplit_once('_') {
        if let Some(n) = parse_suffix(suffix) {
            if n == LEGACY_SUFFIX_SENTINEL {
                return format!("{stem}_1");
            }
            if let Some(next) = n.checked_add(1) {
                return format!("{stem}_{next}");
            }
        }
    }
    format!("{name}_1")
}

fn parse_suffix(suffix: &str) -> Option<i64> {
    let digits = suffix.strip_prefix('-').unwrap_or(suffix);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
