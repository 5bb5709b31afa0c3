//! File I/O utilities with atomic writes
//!
//! Every write goes to a sibling temp file which is flushed, synced and then
//! renamed over the target, so a failed save leaves the previous file intact.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CashflowError, CashflowResult};

/// Sibling temp path used while writing `path`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a file atomically through a buffered writer
///
/// `write` receives the temp file's writer. If it fails, the temp file is
/// removed and the target is not touched.
pub fn write_atomic<P, F>(path: P, write: F) -> CashflowResult<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> CashflowResult<()>,
{
    let path = path.as_ref();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            CashflowError::Io(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path);
    let file = File::create(&temp_path)
        .map_err(|e| CashflowError::Io(format!("Failed to create temp file: {}", e)))?;

    let mut writer = BufWriter::new(file);
    let written = write(&mut writer).and_then(|_| {
        writer
            .flush()
            .map_err(|e| CashflowError::Io(format!("Failed to flush data: {}", e)))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| CashflowError::Io(format!("Failed to sync data: {}", e)))
    });
    drop(writer);

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        CashflowError::Io(format!("Failed to rename temp file: {}", e))
    })
}

/// Write raw bytes atomically
pub fn write_bytes_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> CashflowResult<()> {
    write_atomic(path, |w| Ok(w.write_all(bytes)?))
}

/// Write pretty-printed JSON atomically
pub fn write_json_atomic<T, P>(path: P, data: &T) -> CashflowResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_atomic(path, |w| {
        serde_json::to_writer_pretty(&mut *w, data)
            .map_err(|e| CashflowError::Json(format!("Failed to serialize data: {}", e)))
    })
}

/// Write YAML atomically
pub fn write_yaml_atomic<T, P>(path: P, data: &T) -> CashflowResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let text = serde_yaml::to_string(data)?;
    write_bytes_atomic(path, text.as_bytes())
}

/// Read JSON from a file, returning a default value if the file doesn't exist
pub fn read_json<T, P>(path: P) -> CashflowResult<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(T::default());
    }

    let file = File::open(path)
        .map_err(|e| CashflowError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| CashflowError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_read_nonexistent_returns_default() {
        let temp_dir = TempDir::new().unwrap();

        let data: TestData = read_json(temp_dir.path().join("missing.json")).unwrap();
        assert_eq!(data, TestData::default());
    }

    #[test]
    fn test_json_and_yaml_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let data = TestData {
            name: "groceries".to_string(),
            value: 42,
        };

        let json = temp_dir.path().join("data.json");
        write_json_atomic(&json, &data).unwrap();
        assert_eq!(read_json::<TestData, _>(&json).unwrap(), data);

        let yaml = temp_dir.path().join("data.yaml");
        write_yaml_atomic(&yaml, &data).unwrap();
        let text = fs::read_to_string(&yaml).unwrap();
        assert!(text.contains("name: groceries"));
    }

    #[test]
    fn test_atomic_write_no_temp_file_left() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2025-01.mld");

        write_bytes_atomic(&path, b"abc").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"abc");
        assert!(!temp_dir.path().join("2025-01.mld.tmp").exists());
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger.mld");
        write_bytes_atomic(&path, b"old").unwrap();

        let result = write_atomic(&path, |w| {
            w.write_all(b"partial")?;
            Err(CashflowError::Validation("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"old");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.json");

        write_json_atomic(&path, &TestData::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "not json at all").unwrap();

        let err = read_json::<TestData, _>(&path).unwrap_err();
        assert!(matches!(err, CashflowError::Json(_)));
    }
}
