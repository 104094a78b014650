use crate::error::{EngineError, EngineResult, IoContext};
use crate::metadata::MetadataSource;
use crate::mover::{move_file, sorted_entries};
use crate::sanitize::sanitize_dir;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Directory index files are never kept.
pub const DIRECTORY_INDEX_NAME: &str = "DICOMDIR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenStats {
    pub relocated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub removed_dirs: usize,
    pub skipped: usize,
    pub kept_dirs: usize,
}

/// Collapses every image file under `root` into `root` itself, deletes stray
/// files and removes the emptied subdirectories. Destructive.
pub fn flatten(source: &dyn MetadataSource, root: &Path) -> EngineResult<FlattenStats> {
    if !root.is_dir() {
        return Err(EngineError::InvalidRoot(root.to_path_buf()));
    }
    let root = sanitize_dir(root);
    let mut stats = FlattenStats::default();
    collapse_into(source, &root, &root, &mut stats)?;
    Ok(stats)
}

fn collapse_into(
    source: &dyn MetadataSource,
    current: &Path,
    target: &Path,
    stats: &mut FlattenStats,
) -> EngineResult<()> {
    let mut subdirs = Vec::new();
    for entry in sorted_entries(current)? {
        let path = entry.path();
        if entry.file_type().at(&path)?.is_dir() {
            subdirs.push(path);
            continue;
        }
        if let Err(err) = relocate_or_purge(source, &path, target, stats) {
            log::warn!("leaving {} in place: {err}", path.display());
            stats.skipped += 1;
        }
    }

    for dir in subdirs {
        if let Err(err) = collapse_into(source, &dir, target, stats) {
            log::warn!("could not flatten {}: {err}", dir.display());
        }
        match fs::remove_dir(&dir) {
            Ok(()) => stats.removed_dirs += 1,
            Err(err) => {
                log::warn!("keeping non-empty folder {}: {err}", dir.display());
                stats.kept_dirs += 1;
            }
        }
    }
    Ok(())
}

fn relocate_or_purge(
    source: &dyn MetadataSource,
    path: &Path,
    target: &Path,
    stats: &mut FlattenStats,
) -> EngineResult<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    if file_name == DIRECTORY_INDEX_NAME || !source.is_image_file(path) {
        fs::remove_file(path).at(path)?;
        log::warn!("removed non-image file {}", path.display());
        stats.deleted += 1;
        return Ok(());
    }

    let tags = source.read_tags(path)?;
    let stable_name = match (tags.scalar("SeriesInstanceUID"), tags.scalar("InstanceNumber")) {
        (Some(series), Some(instance)) => format!("{series}_{instance}"),
        _ => {
            log::debug!("{} lacks series/instance identifiers", path.display());
            file_name
        }
    };

    let moved = move_file(source, path, target, &stable_name)?;
    if moved == path {
        stats.unchanged += 1;
    } else {
        stats.relocated += 1;
    }
    Ok(())
}
