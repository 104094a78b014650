//! Test support: a fake metadata source backed by JSON files.

use crate::error::{EngineError, EngineResult};
use crate::metadata::{person_name, MetadataSource, TagMap};
use log::{Level, Log, Metadata, Record};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

pub(crate) const FAKE_MAGIC: &[u8] = b"FAKEDICM\n";

/// Treats files starting with [`FAKE_MAGIC`] as images whose tags follow as JSON.
pub(crate) struct FakeSource;

impl MetadataSource for FakeSource {
    fn is_image_file(&self, path: &Path) -> bool {
        fs::read(path)
            .map(|bytes| bytes.starts_with(FAKE_MAGIC))
            .unwrap_or(false)
    }

    fn read_tags(&self, path: &Path) -> EngineResult<TagMap> {
        let bytes = fs::read(path).map_err(|err| EngineError::unreadable(path, err))?;
        let body = bytes
            .strip_prefix(FAKE_MAGIC)
            .ok_or_else(|| EngineError::unreadable(path, "missing marker"))?;
        serde_json::from_slice(body).map_err(|err| EngineError::unreadable(path, err))
    }
}

pub(crate) fn write_image(dir: &Path, name: &str, tags: &TagMap) -> PathBuf {
    fs::create_dir_all(dir).expect("create image dir");
    let path = dir.join(name);
    let mut bytes = FAKE_MAGIC.to_vec();
    bytes.extend(serde_json::to_vec(tags).expect("serialize tags"));
    fs::write(&path, bytes).expect("write image");
    path
}

pub(crate) fn write_stray(dir: &Path, name: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("create stray dir");
    let path = dir.join(name);
    fs::write(&path, b"not an image").expect("write stray");
    path
}

/// Files (not folders) directly inside `dir`.
pub(crate) fn file_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .expect("read dir")
        .flatten()
        .filter(|entry| entry.path().is_file())
        .count()
}

pub(crate) fn subdirs(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// A typical MR slice.
pub(crate) fn mr_slice(
    patient: (&str, &str),
    series: &str,
    series_number: i64,
    instance: i64,
) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert("PatientName", person_name(patient.0, patient.1));
    tags.insert("StudyDate", "20200101");
    tags.insert("StudyDescription", "Head Routine");
    tags.insert("SeriesDescription", series);
    tags.insert("SeriesNumber", series_number);
    tags.insert("InstanceNumber", instance);
    tags.insert(
        "SeriesInstanceUID",
        format!("1.2.{}.{series_number}", patient.0).as_str(),
    );
    tags.insert(
        "SOPInstanceUID",
        format!("1.2.{}.{series_number}.{instance}", patient.0).as_str(),
    );
    tags
}

thread_local! {
    static CAPTURED: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Keeps every log record on the thread that emitted it, so parallel tests
/// only see their own messages.
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED.with(|lines| {
            lines
                .borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

/// Runs `f` and returns what it logged at warn level or above.
pub(crate) fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    INSTALL.call_once(|| {
        log::set_logger(&CAPTURE_LOGGER).expect("install capture logger");
        log::set_max_level(log::LevelFilter::Trace);
    });
    CAPTURED.with(|lines| lines.borrow_mut().clear());
    let out = f();
    let warnings = CAPTURED.with(|lines| {
        lines
            .borrow_mut()
            .drain(..)
            .filter(|(level, _)| *level <= Level::Warn)
            .map(|(_, line)| line)
            .collect()
    });
    (out, warnings)
}
