use crate::classify::LevelRule;
use crate::rule::NamingRule;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_FILE_RULE: &str = "StudyDescription;RequestingPhysician";
pub const DEFAULT_FILE_EXTENSION: &str = "IMA";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorganizeConfig {
    /// One entry per folder level, outermost first.
    #[serde(default)]
    pub levels: Vec<LevelRule>,
    pub file_rule: NamingRule,
    #[serde(default = "default_extension")]
    pub file_extension: String,
    #[serde(default = "default_upper_case")]
    pub upper_case: bool,
}

fn default_extension() -> String {
    DEFAULT_FILE_EXTENSION.to_string()
}

fn default_upper_case() -> bool {
    true
}

impl Default for ReorganizeConfig {
    fn default() -> Self {
        Self {
            levels: vec![
                LevelRule::new("StudyDate", "", "", true),
                LevelRule::new("SeriesDescription", "SeriesNumber", "PatientName", true),
            ],
            file_rule: NamingRule::parse(DEFAULT_FILE_RULE),
            file_extension: default_extension(),
            upper_case: true,
        }
    }
}

/// Known file naming templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Qa,
    Siemens,
    Domagalik,
    Example,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Self::Qa, Self::Siemens, Self::Domagalik, Self::Example];

    pub fn name(self) -> &'static str {
        match self {
            Self::Qa => "qa",
            Self::Siemens => "siemens",
            Self::Domagalik => "domagalik",
            Self::Example => "example",
        }
    }

    fn file_naming(self) -> (&'static str, &'static str) {
        match self {
            Self::Qa => (DEFAULT_FILE_RULE, DEFAULT_FILE_EXTENSION),
            Self::Siemens => (
                "PatientName;StudyDescription;SeriesNumber;InstanceNumber",
                "IMA",
            ),
            Self::Domagalik => ("RequestingPhysician;SeriesDescription", "IMA"),
            Self::Example => (
                "SeriesDescription;PatientName;PatientID;RequestedProcedureDescription",
                "DCM",
            ),
        }
    }

    /// Replaces the final naming rule and extension of `config`.
    pub fn apply(self, config: &mut ReorganizeConfig) {
        let (rule, extension) = self.file_naming();
        config.file_rule = NamingRule::parse(rule);
        config.file_extension = extension.to_string();
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown preset: {0} (expected qa, siemens, domagalik or example)")]
pub struct UnknownPreset(String);

impl FromStr for Preset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPreset(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
}

pub fn app_paths() -> Result<AppPaths> {
    let proj = ProjectDirs::from("org", "dicom-sorter", "dicom-sorter")
        .context("could not determine the OS configuration directory")?;
    let config_dir = proj.config_dir().to_path_buf();
    Ok(AppPaths {
        config_path: config_dir.join("config.toml"),
        config_dir,
    })
}

pub fn load_config() -> Result<ReorganizeConfig> {
    let paths = app_paths()?;
    if !paths.config_path.exists() {
        return Ok(ReorganizeConfig::default());
    }
    load_config_from(&paths.config_path)
}

pub fn load_config_from(path: &Path) -> Result<ReorganizeConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read config file: {}", path.display()))?;
    toml::from_str::<ReorganizeConfig>(&raw)
        .with_context(|| format!("could not parse config file: {}", path.display()))
}

/// Writes `config` to the default location and returns that path.
pub fn save_config(config: &ReorganizeConfig) -> Result<PathBuf> {
    let paths = app_paths()?;
    save_config_to(config, &paths.config_path)?;
    Ok(paths.config_path)
}

pub fn save_config_to(config: &ReorganizeConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create config directory: {}", dir.display()))?;
    }
    let body = toml::to_string_pretty(config).context("could not serialize config")?;
    fs::write(path, body)
        .with_context(|| format!("could not write config file: {}", path.display()))?;
    Ok(())
}
