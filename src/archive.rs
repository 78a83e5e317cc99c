use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::info;

use crate::TeledashError;

/// Decodes the base64 zip the backend sends with `calibration_saved` and writes it into
/// `dir`. Returns the path of the new file.
pub fn write_calibration_archive(zip_data: &str, dir: &Path) -> Result<PathBuf, TeledashError> {
    let bytes = STANDARD
        .decode(zip_data.trim())
        .map_err(|e| TeledashError::ArchiveDecodeError { source: e })?;
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    fs::create_dir_all(dir).map_err(|e| TeledashError::ArchiveWriteError { source: e })?;
    let path = dir.join(format!("calibration-source-{}.zip", timestamp));
    fs::write(&path, bytes).map_err(|e| TeledashError::ArchiveWriteError { source: e })?;
    info!("Calibration archive written to {:?}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_is_decoded_to_disk() {
        let dir = TempDir::new().unwrap();
        let encoded = STANDARD.encode(b"PK\x05\x06zip");
        let path = write_calibration_archive(&encoded, dir.path()).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"PK\x05\x06zip");
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            write_calibration_archive("%%% not base64", dir.path()),
            Err(TeledashError::ArchiveDecodeError { .. })
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
