use crate::classify::{classify, Classification, DisambiguationTable, LevelRule};
use crate::config::ReorganizeConfig;
use crate::error::{EngineError, EngineResult, IoContext};
use crate::flatten::{flatten, FlattenStats};
use crate::metadata::MetadataSource;
use crate::mover::{move_file, sorted_entries};
use crate::rule::evaluate;
use crate::sanitize::{sanitize_dir, segment_count};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const INSTANCE_NUMBER: &str = "InstanceNumber";

#[derive(Debug, Clone, Serialize)]
pub struct ReorganizeReport {
    pub root: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub flatten: FlattenStats,
    pub levels: Vec<LevelReport>,
    pub rename: RenameStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelReport {
    pub rule: String,
    pub skipped_level: bool,
    pub depth_added: usize,
    pub classified: usize,
    pub folders_created: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameStats {
    pub renamed: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

/// Flattens `root`, builds one folder level per configured rule and renames
/// every file. Fails before touching anything when `root` is not a directory.
pub fn reorganize(
    source: &dyn MetadataSource,
    root: &Path,
    config: &ReorganizeConfig,
) -> EngineResult<ReorganizeReport> {
    if !root.is_dir() {
        return Err(EngineError::InvalidRoot(root.to_path_buf()));
    }
    let root = sanitize_dir(root);
    let started_at = Local::now();

    let mut step = 1;
    log::info!("{step}. Flattening the original directory");
    let flatten = flatten(source, &root)?;

    let mut depth = 0;
    let mut levels = Vec::with_capacity(config.levels.len());
    for (index, level) in config.levels.iter().enumerate() {
        step += 1;
        if level.main.is_empty() {
            log::info!("{step}. Skipping level {} without a rule", index + 1);
            levels.push(LevelReport {
                skipped_level: true,
                ..LevelReport::default()
            });
            continue;
        }
        log::info!("{step}. Adding subfolders according to the rule: {}", level.main);
        let report = classify_level(source, &root, depth, index + 1, level)?;
        depth += report.depth_added;
        levels.push(report);
    }

    step += 1;
    log::info!("{step}. Renaming files");
    let rename = rename_files(source, &root, config)?;

    Ok(ReorganizeReport {
        root,
        started_at,
        finished_at: Local::now(),
        flatten,
        levels,
        rename,
    })
}

/// Classifies every file found `depth` levels below `root` into a new
/// subfolder of its current directory.
pub fn classify_level(
    source: &dyn MetadataSource,
    root: &Path,
    depth: usize,
    level_index: usize,
    level: &LevelRule,
) -> EngineResult<LevelReport> {
    let mut table = DisambiguationTable::new();
    let mut report = LevelReport {
        rule: level.main.to_string(),
        ..LevelReport::default()
    };

    for dir in dirs_at_depth(root, depth)? {
        for file in files_in(&dir)? {
            let classification = match classify_file(source, &dir, &file, level, &mut table) {
                Ok(classification) => classification,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    log::warn!("skipping {}: {err}", file.display());
                    report.skipped += 1;
                    continue;
                }
            };

            let added = added_depth(level_index, &dir, &classification)?;
            if added == 0 {
                log::warn!(
                    "{} stays in {}: the rule produced no folder name",
                    file.display(),
                    dir.display()
                );
            }
            report.depth_added = report.depth_added.max(added);
            report.classified += 1;
            if classification.created {
                report.folders_created += 1;
            }
        }
    }

    log::debug!(
        "level {level_index}: {} files, {} folders, {} table entries",
        report.classified,
        report.folders_created,
        table.entries().len()
    );
    Ok(report)
}

/// Folder levels a classification added below `dir`; more than one is fatal.
fn added_depth(
    level_index: usize,
    dir: &Path,
    classification: &Classification,
) -> EngineResult<usize> {
    let added = segment_count(&classification.destination).saturating_sub(segment_count(dir));
    if added > 1 {
        return Err(EngineError::DepthInvariant {
            level: level_index,
            parent: dir.to_path_buf(),
            destination: classification.destination.clone(),
        });
    }
    Ok(added)
}

fn classify_file(
    source: &dyn MetadataSource,
    dir: &Path,
    file: &Path,
    level: &LevelRule,
    table: &mut DisambiguationTable,
) -> EngineResult<Classification> {
    let tags = source.read_tags(file)?;
    let classification = classify(dir, &tags, level, table)?;
    let name = file_name_of(file);
    move_file(source, file, &classification.destination, &name)?;
    Ok(classification)
}

/// Gives every file under `root` its final `<rule>_<number>.<ext>` name.
pub fn rename_files(
    source: &dyn MetadataSource,
    root: &Path,
    config: &ReorganizeConfig,
) -> EngineResult<RenameStats> {
    let mut stats = RenameStats::default();
    for dir in all_dirs(root)? {
        let files = files_in(&dir)?;
        let width = files.len().to_string().len();
        for (index, file) in files.iter().enumerate() {
            match rename_one(source, &dir, file, index + 1, width, config) {
                Ok(true) => stats.renamed += 1,
                Ok(false) => stats.unchanged += 1,
                Err(err) => {
                    log::warn!("not renaming {}: {err}", file.display());
                    stats.skipped += 1;
                }
            }
        }
    }
    Ok(stats)
}

fn rename_one(
    source: &dyn MetadataSource,
    dir: &Path,
    file: &Path,
    position: usize,
    width: usize,
    config: &ReorganizeConfig,
) -> EngineResult<bool> {
    let tags = source.read_tags(file)?;
    let core = evaluate(&tags, &config.file_rule, config.upper_case)?;
    let number = tags
        .scalar(INSTANCE_NUMBER)
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(position as i64);
    let name = final_file_name(&core, number, width, &config.file_extension);
    let moved = move_file(source, file, dir, &name)?;
    Ok(moved != file)
}

pub fn final_file_name(core: &str, number: i64, width: usize, extension: &str) -> String {
    let mut name = if core.is_empty() {
        format!("{number:0width$}")
    } else {
        format!("{core}_{number:0width$}")
    };
    let extension = extension.trim_start_matches('.');
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }
    name
}

fn dirs_at_depth(root: &Path, depth: usize) -> EngineResult<Vec<PathBuf>> {
    collect_dirs(WalkDir::new(root).min_depth(depth).max_depth(depth), root)
}

fn all_dirs(root: &Path) -> EngineResult<Vec<PathBuf>> {
    collect_dirs(WalkDir::new(root), root)
}

fn collect_dirs(walker: WalkDir, root: &Path) -> EngineResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in walker.sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            EngineError::io(&path, err.into())
        })?;
        if entry.file_type().is_dir() {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn files_in(dir: &Path) -> EngineResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in sorted_entries(dir)? {
        let path = entry.path();
        if !entry.file_type().at(&path)?.is_dir() {
            out.push(path);
        }
    }
    Ok(out)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
