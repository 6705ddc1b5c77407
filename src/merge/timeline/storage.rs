//! Timeline persistence
//!
//! One JSON file per tracked path under `.ralph-ui/file-timelines/`. The file
//! name is the path with every non-alphanumeric character flattened to `_`,
//! followed by the first 8 hex digits of the path's SHA-256, so
//! `src/app/main.py` lands in `src_app_main_py-<hash>.json`. Flattening alone
//! is not injective (`src/a_b.py` and `src/a/b.py`), the digest keeps names apart.

use crate::file_storage::{ensure_dir, get_timelines_dir, read_json, write_json, FileResult};
use crate::merge::timeline::models::FileTimeline;
use crate::utils::sanitize_path_component;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Storage for file timelines in one project
pub struct TimelineStore {
    dir: PathBuf,
}

impl TimelineStore {
    /// Store rooted at the project's default timelines directory
    pub fn new(project_path: &Path) -> Self {
        Self {
            dir: get_timelines_dir(project_path),
        }
    }

    /// Store rooted at an explicit directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file name for a tracked path
    pub fn file_name_for(file_path: &str) -> String {
        let digest = hex::encode(Sha256::digest(file_path.as_bytes()));
        format!("{}-{}.json", sanitize_path_component(file_path), &digest[..8])
    }

    pub fn path_for(&self, file_path: &str) -> PathBuf {
        self.dir.join(Self::file_name_for(file_path))
    }

    /// Load every stored timeline, keyed by the original file path.
    ///
    /// Unreadable records are skipped with a warning rather than failing the load.
    pub fn load_all(&self) -> FileResult<HashMap<String, FileTimeline>> {
        let mut timelines = HashMap::new();

        if !self.dir.exists() {
            return Ok(timelines);
        }

        let entries = fs::read_dir(&self.dir)
            .map_err(|e| format!("Failed to read timelines directory {:?}: {}", self.dir, e))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            match read_json::<FileTimeline>(&path) {
                Ok(timeline) => {
                    let expected = Self::file_name_for(&timeline.file_path);
                    if path.file_name().map_or(true, |name| name != expected.as_str()) {
                        log::warn!(
                            "[TimelineStore] Skipping {:?}: record for {} belongs in {}",
                            path,
                            timeline.file_path,
                            expected
                        );
                        continue;
                    }
                    timelines.insert(timeline.file_path.clone(), timeline);
                }
                Err(e) => {
                    log::warn!("[TimelineStore] Skipping unreadable timeline {:?}: {}", path, e);
                }
            }
        }

        log::debug!(
            "[TimelineStore] Loaded {} timeline(s) from {:?}",
            timelines.len(),
            self.dir
        );
        Ok(timelines)
    }

    /// Load a single timeline
    pub fn load(&self, file_path: &str) -> FileResult<Option<FileTimeline>> {
        let path = self.path_for(file_path);
        if !path.exists() {
            return Ok(None);
        }
        let timeline: FileTimeline = read_json(&path)?;
        if timeline.file_path != file_path {
            return Err(format!(
                "Timeline record {:?} is for {}, not {}",
                path, timeline.file_path, file_path
            ));
        }
        Ok(Some(timeline))
    }

    /// Persist a timeline atomically
    pub fn save(&self, timeline: &FileTimeline) -> FileResult<()> {
        ensure_dir(&self.dir)?;
        write_json(&self.path_for(&timeline.file_path), timeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_flattening() {
        let name = TimelineStore::file_name_for("src/app/main.py");
        assert!(name.starts_with("src_app_main_py-"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "src_app_main_py-".len() + 8 + ".json".len());
        assert_eq!(name, TimelineStore::file_name_for("src/app/main.py"));
    }

    #[test]
    fn test_paths_that_flatten_alike_get_separate_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = TimelineStore::new(temp_dir.path());
        assert_ne!(
            TimelineStore::file_name_for("src/a_b.py"),
            TimelineStore::file_name_for("src/a/b.py")
        );

        store.save(&FileTimeline::new("src/a_b.py")).unwrap();
        store.save(&FileTimeline::new("src/a/b.py")).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(store.load("src/a_b.py").unwrap().unwrap().file_path, "src/a_b.py");
        assert_eq!(store.load("src/a/b.py").unwrap().unwrap().file_path, "src/a/b.py");
    }

    #[test]
    fn test_misplaced_record_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = TimelineStore::new(temp_dir.path());
        store.save(&FileTimeline::new("src/real.py")).unwrap();
        fs::copy(store.path_for("src/real.py"), store.path_for("src/other.py")).unwrap();

        assert!(store.load("src/other.py").is_err());
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("src/real.py"));
    }

    #[test]
    fn test_save_and_load_all() {
        let temp_dir = TempDir::new().unwrap();
        let store = TimelineStore::new(temp_dir.path());

        store.save(&FileTimeline::new("src/a.py")).unwrap();
        store.save(&FileTimeline::new("src/b.ts")).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains_key("src/a.py"));
        assert!(loaded.contains_key("src/b.ts"));

        let single = store.load("src/a.py").unwrap().unwrap();
        assert_eq!(single.file_path, "src/a.py");
        assert!(store.load("missing.rs").unwrap().is_none());
    }

    #[test]
    fn test_load_all_skips_corrupt_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = TimelineStore::new(temp_dir.path());
        store.save(&FileTimeline::new("ok.py")).unwrap();
        fs::write(store.dir().join("broken.json"), "{ not json").unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_load_all_on_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = TimelineStore::with_dir(temp_dir.path().join("nope"));
        assert!(store.load_all().unwrap().is_empty());
    }
}
