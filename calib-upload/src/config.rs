use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use calib_upload_queue::{CameraInfo, DeviceInfo};

use crate::Result;

/// The default value for [UploaderConfig::upload_extension].
pub const DEFAULT_UPLOAD_EXTENSION: &str = "upload";

/// The default value for [UploaderConfig::status_hide_secs].
pub const DEFAULT_STATUS_HIDE_SECS: f64 = 9.0;

/// The default value for [UploaderConfig::connectivity_probe_url].
pub const DEFAULT_CONNECTIVITY_PROBE_URL: &str = "http://www.google.com";

/// The default value for [UploaderConfig::timeout_secs].
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

fn default_upload_extension() -> String {
    DEFAULT_UPLOAD_EXTENSION.to_string()
}

fn default_status_hide_secs() -> f64 {
    DEFAULT_STATUS_HIDE_SECS
}

fn default_connectivity_probe_url() -> String {
    DEFAULT_CONNECTIVITY_PROBE_URL.to_string()
}

fn default_timeout_secs() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

/// Configuration of the calibration uploader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploaderConfig {
    /// Directory holding queued calibrations. Can contain shell variables.
    pub queue_dir: PathBuf,
    /// Directory receiving a user-visible copy of every parameter file.
    pub share_dir: Option<PathBuf>,
    /// Extension marking a committed index file. Defaults to
    /// [DEFAULT_UPLOAD_EXTENSION].
    #[serde(default = "default_upload_extension")]
    pub upload_extension: String,
    /// URL receiving the multipart form POST.
    pub endpoint_url: String,
    /// How long the final status of an upload cycle remains visible.
    #[serde(default = "default_status_hide_secs")]
    pub status_hide_secs: f64,
    /// Opaque token sent with each upload.
    #[serde(default)]
    pub auth_token: String,
    /// Well-known URL probed with a HEAD request before uploading.
    #[serde(default = "default_connectivity_probe_url")]
    pub connectivity_probe_url: String,
    /// Connect and transfer timeout of each request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Verify the TLS certificate of the upload server.
    ///
    /// Off by default: the collection server has historically been
    /// reachable only with unverified certificates.
    #[serde(default)]
    pub verify_tls: bool,
    /// Start an upload cycle as soon as the uploader is initialized.
    #[serde(default = "default_true")]
    pub upload_on_start: bool,
    /// The calibrated camera.
    #[serde(default)]
    pub camera: CameraInfo,
    /// Overrides the description of the host device.
    pub device: Option<DeviceInfo>,
}

impl UploaderConfig {
    /// Create a configuration with default values for all optional fields.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(queue_dir: P, endpoint_url: S) -> Self {
        Self {
            queue_dir: queue_dir.into(),
            share_dir: None,
            upload_extension: default_upload_extension(),
            endpoint_url: endpoint_url.into(),
            status_hide_secs: default_status_hide_secs(),
            auth_token: String::new(),
            connectivity_probe_url: default_connectivity_probe_url(),
            timeout_secs: default_timeout_secs(),
            verify_tls: false,
            upload_on_start: true,
            camera: CameraInfo::default(),
            device: None,
        }
    }

    pub fn status_hide(&self) -> Duration {
        secs_to_duration(self.status_hide_secs)
    }

    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }

    fn fixup_relative_paths(&mut self, dirname: &Path) -> Result<()> {
        fixup_relative_path(&mut self.queue_dir, dirname)?;
        if let Some(share_dir) = self.share_dir.as_mut() {
            fixup_relative_path(share_dir, dirname)?;
        }
        Ok(())
    }
}

/// Expand shell variables in `path` and, if it is relative, make it relative
/// to `dirname`.
fn fixup_relative_path(path: &mut PathBuf, dirname: &Path) -> Result<()> {
    let pathstr = path.to_string_lossy().to_string();
    let expanded = shellexpand::full(&pathstr)?;
    *path = PathBuf::from(expanded.to_string());

    if path.is_relative() {
        *path = dirname.join(&path);
    }
    Ok(())
}

/// Parse a `.toml` file and return an [UploaderConfig].
///
/// Relative directories are resolved against the directory containing
/// `fname`.
pub fn parse_config_file<P: AsRef<Path>>(fname: P) -> Result<UploaderConfig> {
    let contents = std::fs::read_to_string(fname.as_ref())?;
    let mut cfg: UploaderConfig = toml::from_str(&contents)?;
    let dirname = fname
        .as_ref()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    cfg.fixup_relative_paths(&dirname)?;
    Ok(cfg)
}
