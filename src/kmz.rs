//! Responsible for the output artifact
use std::{
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

use tracing::{Instrument, info, info_span, warn};
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

use crate::error::PipelineError;

/// Entry name Google Earth and most tools look for first.
pub const KML_ENTRY_NAME: &str = "doc.kml";

/// Zips the document as the single `doc.kml` entry.
/// The entry timestamp is fixed so the same KML always gives the same bytes.
pub fn package(kml: &str) -> Result<Vec<u8>, PipelineError> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(KML_ENTRY_NAME, options)
        .map_err(PipelineError::Packaging)?;
    writer
        .write_all(kml.as_bytes())
        .map_err(|e| PipelineError::Packaging(e.into()))?;

    let archive = writer.finish().map_err(PipelineError::Packaging)?;

    Ok(archive.into_inner())
}

/// Writes next to the destination first and renames on success,
/// so a failed run never leaves a partial file at `path`.
#[tracing::instrument(err, skip(bytes), fields(bytes = bytes.len()))]
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let write_failure = |cause: std::io::Error| PipelineError::WriteFailure {
        path: path.to_path_buf(),
        cause,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_failure)?;
    }

    let temp_path = temp_path_for(path);

    let written = tokio::fs::write(&temp_path, bytes)
        .instrument(info_span!("Writing temporary file"))
        .await;
    let renamed = match written {
        Ok(()) => tokio::fs::rename(&temp_path, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = renamed {
        if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
            warn!("could not remove {}: {cleanup}", temp_path.display());
        }
        return Err(write_failure(e));
    }

    info!("wrote {}", path.display());

    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;
    use crate::test_fixtures::scratch_dir;

    const KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document><name>Transit</name></Document></kml>
"#;

    #[test]
    fn archive_holds_one_kml_entry() {
        let bytes = package(KML).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);

        let mut entry = archive.by_name(KML_ENTRY_NAME).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, KML);
    }

    #[test]
    fn packaging_is_deterministic() {
        assert_eq!(package(KML).unwrap(), package(KML).unwrap());
    }

    #[tokio::test]
    async fn writes_and_leaves_no_temp_file() {
        let dir = scratch_dir("kmz-write");
        let path = dir.join("nested").join("out.kmz");

        write_atomically(&path, b"payload").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn unwritable_destination_is_a_write_failure() {
        let dir = scratch_dir("kmz-unwritable");
        // a directory already sits where the file should go
        let path = dir.join("taken");
        std::fs::create_dir_all(path.join("child")).unwrap();

        let err = write_atomically(&path, b"payload").await.unwrap_err();

        assert!(matches!(err, PipelineError::WriteFailure { .. }));
        assert!(path.is_dir());
    }
}
