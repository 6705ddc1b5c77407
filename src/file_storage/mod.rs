//! File-based storage helpers for the merge engine
//!
//! All merge state lives under the project's `.ralph-ui/` directory so it
//! survives restarts and can be inspected by hand:
//!
//! - `file-timelines/` - One JSON record per tracked source file
//! - `merge-reports/` - Reports of live merge runs
//! - `locks/` - Advisory `.lock` sidecar files for in-flight merges
//! - `merge.yaml` - Merge engine configuration
//!
//! Global user storage (`~/.ralph-ui/`) only holds a fallback `merge.yaml`.

use std::fs;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Get the .ralph-ui directory for a project
pub fn get_ralph_ui_dir(project_path: &Path) -> PathBuf {
    project_path.join(".ralph-ui")
}

/// Get the global .ralph-ui directory in user home
pub fn get_global_ralph_ui_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ralph-ui")
}

/// Directory holding persisted file timelines
pub fn get_timelines_dir(project_path: &Path) -> PathBuf {
    get_ralph_ui_dir(project_path).join("file-timelines")
}

/// Directory holding merge reports
pub fn get_reports_dir(project_path: &Path) -> PathBuf {
    get_ralph_ui_dir(project_path).join("merge-reports")
}

/// Directory holding merge lock files
pub fn get_locks_dir(project_path: &Path) -> PathBuf {
    get_ralph_ui_dir(project_path).join("locks")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Temp path next to the target so the final rename never crosses filesystems
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let temp_name = format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

/// Write data to a file atomically (temp file in the same directory + rename).
///
/// On failure the temp file is removed and the original file is left untouched.
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    let temp_path = temp_path_for(path);

    if let Err(e) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(format!("Failed to write temp file {:?}: {}", temp_path, e));
    }

    // Keep the target's mode (e.g. executable scripts)
    if let Some(metadata) = fs::metadata(path).ok().filter(|m| m.is_file()) {
        if let Err(e) = fs::set_permissions(&temp_path, metadata.permissions()) {
            let _ = fs::remove_file(&temp_path);
            return Err(format!("Failed to copy permissions to {:?}: {}", temp_path, e));
        }
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(format!(
            "Failed to rename {:?} to {:?}: {}",
            temp_path, path, e
        ));
    }

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

/// Initialize the .ralph-ui directory for merge state with a .gitignore
pub fn init_merge_storage(project_path: &Path) -> FileResult<PathBuf> {
    let ralph_ui_dir = get_ralph_ui_dir(project_path);
    ensure_dir(&ralph_ui_dir)?;

    ensure_dir(&get_timelines_dir(project_path))?;
    ensure_dir(&get_reports_dir(project_path))?;
    ensure_dir(&get_locks_dir(project_path))?;

    // Runtime files are never shared between machines
    let gitignore_path = ralph_ui_dir.join(".gitignore");
    if !gitignore_path.exists() {
        let gitignore_content = r#"# Runtime files (not for sharing)
*.lock
*.tmp
locks/
merge-reports/
"#;
        fs::write(&gitignore_path, gitignore_content)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    Ok(ralph_ui_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_ralph_ui_dir() {
        let project_path = Path::new("/home/user/my-project");
        let ralph_ui_dir = get_ralph_ui_dir(project_path);
        assert_eq!(ralph_ui_dir, PathBuf::from("/home/user/my-project/.ralph-ui"));
        assert_eq!(
            get_timelines_dir(project_path),
            PathBuf::from("/home/user/my-project/.ralph-ui/file-timelines")
        );
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("app.py");

        atomic_write(&file_path, "old").unwrap();
        atomic_write(&file_path, "new").unwrap();

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "new");

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_atomic_write_does_not_clobber_sibling_with_tmp_extension() {
        let temp_dir = TempDir::new().unwrap();
        let sibling = temp_dir.path().join("app.tmp");
        fs::write(&sibling, "keep me").unwrap();

        atomic_write(&temp_dir.path().join("app.py"), "print(1)\n").unwrap();

        assert_eq!(fs::read_to_string(&sibling).unwrap(), "keep me");
    }

    #[test]
    fn test_atomic_write_failure_preserves_original() {
        let temp_dir = TempDir::new().unwrap();
        // A directory in place of the target makes the rename fail
        let target = temp_dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner.txt"), "x").unwrap();

        let result = atomic_write(&target, "content");
        assert!(result.is_err());
        assert!(target.is_dir());

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\necho old\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        atomic_write(&script, "#!/bin/sh\necho new\n").unwrap();

        assert_eq!(fs::read_to_string(&script).unwrap(), "#!/bin/sh\necho new\n");
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_read_write_json() {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        struct TestData {
            name: String,
            value: i32,
        }

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_json(&file_path, &data).unwrap();
        let read_data: TestData = read_json(&file_path).unwrap();

        assert_eq!(data, read_data);
    }

    #[test]
    fn test_init_merge_storage() {
        let temp_dir = TempDir::new().unwrap();

        let ralph_ui_dir = init_merge_storage(temp_dir.path()).unwrap();

        assert!(ralph_ui_dir.join("file-timelines").exists());
        assert!(ralph_ui_dir.join("merge-reports").exists());
        assert!(ralph_ui_dir.join("locks").exists());

        let gitignore_content = fs::read_to_string(ralph_ui_dir.join(".gitignore")).unwrap();
        assert!(gitignore_content.contains("locks/"));
    }
}
