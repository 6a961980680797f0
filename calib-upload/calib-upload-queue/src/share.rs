//! A user-visible copy of each parameter file, kept independent of the queue.

use std::path::{Path, PathBuf};

use crate::{Error, Result, UploadMetadata, dir_store::write_synced, ensure_dir};

/// File name for the shared copy of a parameter file.
///
/// `camera_para-<device id>-<camera index>-<width>x<height>[-<focal length>].dat`
/// with path separators in the device id replaced by `_`.
pub fn share_file_name(metadata: &UploadMetadata) -> String {
    let device_id: String = metadata
        .device
        .device_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let mut name = format!(
        "camera_para-{}-{}-{}x{}",
        device_id, metadata.camera.index, metadata.width, metadata.height
    );
    if metadata.camera.has_focal_length() {
        name.push('-');
        name.push_str(&metadata.camera.focal_length_string());
    }
    name.push_str(".dat");
    name
}

/// Write `payload` into `share_dir`, creating the directory if needed.
///
/// An existing copy for the same camera and resolution is replaced.
pub fn write_share_copy(
    share_dir: &Path,
    metadata: &UploadMetadata,
    payload: &[u8],
) -> Result<PathBuf> {
    ensure_dir(share_dir)?;
    let dest = share_dir.join(share_file_name(metadata));
    write_synced(&dest, payload).map_err(|e| Error::io(&dest, e))?;
    Ok(dest)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::test::sample_metadata;

    #[test]
    fn separators_are_replaced() {
        let mut md = sample_metadata();
        md.device.device_id = r"acme/phone\board".into();
        assert_eq!(
            share_file_name(&md),
            "camera_para-acme_phone_board-1-1280x720.dat"
        );
    }

    #[test]
    fn known_focal_length_is_appended() {
        let mut md = sample_metadata();
        md.camera.focal_length = Some(0.00425);
        assert_eq!(
            share_file_name(&md),
            "camera_para-Google_Pixel 7_panther-1-1280x720-0.004.dat"
        );
    }

    #[test]
    fn copy_is_written() -> Result<()> {
        let tempdir = tempfile::tempdir().unwrap();
        let share_dir = tempdir.path().join("calibs");
        let dest = write_share_copy(&share_dir, &sample_metadata(), b"params")?;
        assert_eq!(std::fs::read(&dest).unwrap(), b"params");
        assert!(dest.starts_with(&share_dir));
        Ok(())
    }
}
