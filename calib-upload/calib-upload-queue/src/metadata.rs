use std::path::Path;

use serde::{Deserialize, Serialize};

use calib_param::CalibrationErrors;

use crate::IndexFile;

/// Names of the index entries, in the order they are written.
pub mod index_keys {
    pub const FILE: &str = "file";
    pub const TIMESTAMP: &str = "timestamp";
    pub const OS_NAME: &str = "os_name";
    pub const OS_ARCH: &str = "os_arch";
    pub const OS_VERSION: &str = "os_version";
    pub const DEVICE_ID: &str = "device_id";
    pub const FOCAL_LENGTH: &str = "focal_length";
    pub const CAMERA_INDEX: &str = "camera_index";
    pub const CAMERA_FACE: &str = "camera_face";
    pub const CAMERA_WIDTH: &str = "camera_width";
    pub const CAMERA_HEIGHT: &str = "camera_height";
    pub const ERR_MIN: &str = "err_min";
    pub const ERR_AVG: &str = "err_avg";
    pub const ERR_MAX: &str = "err_max";
    /// Opaque authentication token.
    pub const TOKEN: &str = "ss";
}

/// Which way the calibrated camera faces.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFace {
    Front,
    #[default]
    Rear,
}

impl std::fmt::Display for CameraFace {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CameraFace::Front => write!(f, "front"),
            CameraFace::Rear => write!(f, "rear"),
        }
    }
}

/// Identification of the calibrated camera on its device.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraInfo {
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub facing: CameraFace,
    /// Focal length in metres, if known.
    pub focal_length: Option<f64>,
}

impl CameraInfo {
    /// Focal length with three decimals. `0.000` when unknown.
    pub fn focal_length_string(&self) -> String {
        format!("{:.3}", self.focal_length.unwrap_or(0.0))
    }

    /// `false` if the focal length is unknown or rounds to zero.
    pub fn has_focal_length(&self) -> bool {
        self.focal_length_string() != "0.000"
    }
}

/// Description of the device that performed the calibration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceInfo {
    pub os_name: String,
    pub os_arch: String,
    pub os_version: String,
    /// e.g. `manufacturer/model/board`
    pub device_id: String,
}

impl DeviceInfo {
    /// Describe the machine this program is running on.
    pub fn from_host() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".into());
        Self {
            os_name: std::env::consts::OS.into(),
            os_arch: std::env::consts::ARCH.into(),
            os_version: "unknown".into(),
            device_id: format!("{}/{}", std::env::consts::FAMILY, host),
        }
    }
}

/// Everything the collection server stores alongside a parameter file.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub device: DeviceInfo,
    pub camera: CameraInfo,
    pub width: i32,
    pub height: i32,
    pub errors: CalibrationErrors,
    pub auth_token: String,
}

impl UploadMetadata {
    /// Build the index for a parameter file stored at `payload_path`.
    pub fn to_index(&self, payload_path: &Path) -> IndexFile {
        use index_keys::*;

        let mut idx = IndexFile::new();
        idx.push(FILE, payload_path.to_string_lossy());
        idx.push(
            TIMESTAMP,
            self.timestamp.format("%Y-%m-%d %H:%M:%S %z").to_string(),
        );
        idx.push(OS_NAME, &self.device.os_name);
        idx.push(OS_ARCH, &self.device.os_arch);
        idx.push(OS_VERSION, &self.device.os_version);
        idx.push(DEVICE_ID, &self.device.device_id);
        idx.push(FOCAL_LENGTH, self.camera.focal_length_string());
        idx.push(CAMERA_INDEX, self.camera.index.to_string());
        idx.push(CAMERA_FACE, self.camera.facing.to_string());
        idx.push(CAMERA_WIDTH, self.width.to_string());
        idx.push(CAMERA_HEIGHT, self.height.to_string());
        idx.push(ERR_MIN, format!("{:.6}", self.errors.min));
        idx.push(ERR_AVG, format!("{:.6}", self.errors.avg));
        idx.push(ERR_MAX, format!("{:.6}", self.errors.max));
        idx.push(TOKEN, &self.auth_token);
        idx
    }
}
