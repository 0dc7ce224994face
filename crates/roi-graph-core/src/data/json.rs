//! JSON session files.
//!
//! Each `*.json` file in the input directory holds one [`SessionData`]
//! document. Sessions are ordered by file name.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{TrackingError, TrackingResult};
use crate::types::{SessionData, SpatialFootprint};

/// Read every session file in `dir`.
///
/// # Errors
///
/// - `TrackingError::Io` if the directory or a file cannot be read
/// - `TrackingError::InvalidInput` if there are no session files or a
///   footprint is malformed
/// - `TrackingError::Serialization` if a file is not a session document
pub fn read_sessions(dir: &Path) -> TrackingResult<Vec<SessionData>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| TrackingError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(TrackingError::invalid_input(format!(
            "no session files (*.json) in {}",
            dir.display()
        )));
    }

    paths.iter().map(|p| read_session(p)).collect()
}

fn read_session(path: &Path) -> TrackingResult<SessionData> {
    let file = fs::File::open(path).map_err(|e| TrackingError::io(path, e))?;
    let mut session: SessionData = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| TrackingError::Serialization(format!("{}: {}", path.display(), e)))?;

    // Deserialization bypasses the footprint constructor; rebuild to sort and check.
    for roi in &mut session.rois {
        roi.footprint = SpatialFootprint::new(
            roi.footprint.pixels().to_vec(),
            roi.footprint.weights().to_vec(),
        )
        .map_err(|e| {
            TrackingError::invalid_input(format!("{} ({}): {}", session.name, path.display(), e))
        })?;
    }

    debug!(path = %path.display(), n_rois = session.rois.len(), "Read session file");
    Ok(session)
}

/// Write one `session_NNN.json` file per session into `dir`, creating it if needed.
pub fn write_sessions(dir: &Path, sessions: &[SessionData]) -> TrackingResult<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| TrackingError::io(dir, e))?;
    sessions
        .iter()
        .enumerate()
        .map(|(i, session)| {
            let path = dir.join(format!("session_{:03}.json", i));
            let file = fs::File::create(&path).map_err(|e| TrackingError::io(&path, e))?;
            serde_json::to_writer(BufWriter::new(file), session)?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoiRecord;

    fn session(name: &str) -> SessionData {
        let fp = SpatialFootprint::new(vec![5, 1, 2], vec![0.5, 1.0, 0.25]).expect("footprint");
        SessionData {
            name: name.to_string(),
            fov_height: 4,
            fov_width: 4,
            rois: vec![RoiRecord::new(fp).with_embedding(vec![1.0, 0.0])],
        }
    }

    #[test]
    fn test_write_then_read_preserves_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = vec![session("day1"), session("day2"), session("day3")];
        let paths = write_sessions(dir.path(), &sessions).expect("write");
        assert_eq!(paths.len(), 3);

        let read = read_sessions(dir.path()).expect("read");
        let names: Vec<&str> = read.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["day1", "day2", "day3"], "sessions ordered by file name");
        assert_eq!(read, sessions);
        println!("[PASS] session files keep their order");
    }

    #[test]
    fn test_unsorted_footprint_is_normalized_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = r#"{"name":"a","fov_height":2,"fov_width":2,
            "rois":[{"footprint":{"pixels":[3,0],"weights":[0.5,1.0]}}]}"#;
        fs::write(dir.path().join("a.json"), doc).expect("write");

        let read = read_sessions(dir.path()).expect("read");
        assert_eq!(read[0].rois[0].footprint.pixels(), &[0, 3]);
        assert_eq!(read[0].rois[0].footprint.weights(), &[1.0, 0.5]);
    }

    #[test]
    fn test_duplicate_pixels_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = r#"{"name":"a","fov_height":2,"fov_width":2,
            "rois":[{"footprint":{"pixels":[1,1],"weights":[0.5,1.0]}}]}"#;
        fs::write(dir.path().join("a.json"), doc).expect("write");

        let err = read_sessions(dir.path()).expect_err("duplicate pixels");
        assert!(matches!(err, TrackingError::InvalidInput { .. }), "got {:?}", err);
    }

    #[test]
    fn test_empty_dir_and_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            read_sessions(dir.path()),
            Err(TrackingError::InvalidInput { .. })
        ));
        assert!(matches!(
            read_sessions(&dir.path().join("nope")),
            Err(TrackingError::Io { .. })
        ));
    }

    #[test]
    fn test_unknown_session_field_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = r#"{"name":"a","fov_height":2,"fov_width":2,"rois":[],"extra":1}"#;
        fs::write(dir.path().join("a.json"), doc).expect("write");
        assert!(matches!(
            read_sessions(dir.path()),
            Err(TrackingError::Serialization(_))
        ));
    }
}
