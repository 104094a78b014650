mod classify;
mod config;
mod dicom;
mod error;
mod flatten;
mod metadata;
mod mover;
mod reorganize;
mod rule;
mod sanitize;
#[cfg(test)]
mod testing;

pub use classify::{
    adjust_folder_name, classify, Classification, DisambiguationEntry, DisambiguationTable,
    LevelRule, LEGACY_SUFFIX_SENTINEL,
};
pub use config::{
    app_paths, load_config, load_config_from, save_config, save_config_to, AppPaths, Preset,
    ReorganizeConfig, UnknownPreset,
};
pub use dicom::{read_dicom_tags, DicomFileSource};
pub use error::{EngineError, EngineResult};
pub use flatten::{flatten, FlattenStats, DIRECTORY_INDEX_NAME};
pub use metadata::{person_name, MetadataSource, TagMap, TagValue};
pub use mover::{move_file, move_folder, move_with_random_fallback};
pub use reorganize::{
    classify_level, final_file_name, rename_files, reorganize, LevelReport, RenameStats,
    ReorganizeReport,
};
pub use rule::{evaluate, NamingRule};
pub use sanitize::{sanitize_dir, sanitize_string, sanitize_value};
