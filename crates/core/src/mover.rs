use crate::error::{EngineError, EngineResult, IoContext};
use crate::metadata::MetadataSource;
use crate::sanitize::sanitize_file_name;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

pub const RANDOM_NAME_LEN: usize = 20;
pub const MAX_RANDOM_ATTEMPTS: usize = 32;
const SOP_INSTANCE_UID: &str = "SOPInstanceUID";

/// Moves `old_path` into `new_dir` as `desired_name` without overwriting.
///
/// When the name is taken the file's `SOPInstanceUID` plus the extension of
/// `desired_name` is tried next, then a random name. A file already in
/// `new_dir` whose two stable names belong to other files stays put.
pub fn move_file(
    source: &dyn MetadataSource,
    old_path: &Path,
    new_dir: &Path,
    desired_name: &str,
) -> EngineResult<PathBuf> {
    let name = sanitize_file_name(desired_name);
    let naive = new_dir.join(&name);
    if naive == old_path {
        return Ok(naive);
    }
    if !naive.exists() {
        rename(old_path, &naive)?;
        return Ok(naive);
    }

    let extension = extension_with_dot(&name);
    if let Some(unique) = unique_instance_name(source, old_path, &extension) {
        let candidate = new_dir.join(unique);
        if candidate == old_path {
            return Ok(candidate);
        }
        if !candidate.exists() {
            rename(old_path, &candidate)?;
            return Ok(candidate);
        }
    }

    let (old_dir, old_name) = split_file_path(old_path)?;
    if old_dir == new_dir {
        return Ok(old_path.to_path_buf());
    }
    move_with_random_fallback(old_dir, new_dir, &old_name, &name)
}

/// Moves a whole folder; merges file by file when `new_path` already exists.
pub fn move_folder(old_path: &Path, new_path: &Path) -> EngineResult<()> {
    if old_path == new_path {
        return Ok(());
    }
    if !new_path.exists() {
        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        return rename(old_path, new_path);
    }

    for entry in sorted_entries(old_path)? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().at(&path)?.is_dir() {
            move_folder(&path, &new_path.join(&name))?;
        } else {
            move_with_random_fallback(old_path, new_path, &name, &name)?;
        }
    }
    fs::remove_dir(old_path).at(old_path)?;
    log::debug!("merged {} into {}", old_path.display(), new_path.display());
    Ok(())
}

/// Moves `old_dir/old_name` to `new_dir/new_name`, replacing the name with a
/// random alphanumeric one (keeping the extension) while the target exists.
pub fn move_with_random_fallback(
    old_dir: &Path,
    new_dir: &Path,
    old_name: &str,
    new_name: &str,
) -> EngineResult<PathBuf> {
    let from = old_dir.join(old_name);
    let mut target = new_dir.join(new_name);
    let extension = extension_with_dot(new_name);

    for _ in 0..MAX_RANDOM_ATTEMPTS {
        if !target.exists() {
            rename(&from, &target)?;
            return Ok(target);
        }
        target = new_dir.join(format!("{}{}", random_name(RANDOM_NAME_LEN), extension));
    }

    Err(EngineError::NameCollisionExhausted {
        dir: new_dir.to_path_buf(),
        attempts: MAX_RANDOM_ATTEMPTS,
    })
}

pub fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub(crate) fn sorted_entries(dir: &Path) -> EngineResult<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)
        .at(dir)?
        .collect::<Result<Vec<_>, _>>()
        .at(dir)?;
    entries.sort_by_key(|entry| entry.file_name());
    Ok(entries)
}

fn unique_instance_name(
    source: &dyn MetadataSource,
    path: &Path,
    extension: &str,
) -> Option<String> {
    match source.read_tags(path) {
        Ok(tags) => tags
            .scalar(SOP_INSTANCE_UID)
            .map(|uid| sanitize_file_name(&format!("{uid}{extension}"))),
        Err(err) => {
            log::debug!("no instance identifier for {}: {err}", path.display());
            None
        }
    }
}

fn split_file_path(path: &Path) -> EngineResult<(&Path, String)> {
    match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => Ok((dir, name.to_string_lossy().to_string())),
        _ => Err(EngineError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
        )),
    }
}

/// `.ext` when `name` ends in something shaped like a file extension. UID
/// style names (`1.2.840.10`) and flattened names (`1.2.3_4`) have none.
fn extension_with_dot(name: &str) -> String {
    let Some(ext) = Path::new(name).extension().and_then(|ext| ext.to_str()) else {
        return String::new();
    };
    let shaped = (1..=5).contains(&ext.len())
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && ext.chars().any(|c| c.is_ascii_alphabetic());
    if shaped {
        format!(".{ext}")
    } else {
        String::new()
    }
}

fn rename(from: &Path, to: &Path) -> EngineResult<()> {
    fs::rename(from, to).at(from)?;
    log::debug!("moved {} -> {}", from.display(), to.display());
    Ok(())
}
