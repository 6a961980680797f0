//! Queue camera calibration results and upload them in the background.
//!
//! [Uploader] normalizes a calibration, stores it in a durable on-disk queue
//! and wakes a single worker thread which drains the queue to a collection
//! server with multipart form POSTs. Items are only removed after the server
//! answered with HTTP 200, so calibrations survive crashes, restarts and
//! offline periods.

mod config;
mod notifier;
mod signal;
mod status;
mod transport;
mod uploader;
mod worker;

pub use crate::config::{
    DEFAULT_CONNECTIVITY_PROBE_URL, DEFAULT_STATUS_HIDE_SECS, DEFAULT_TIMEOUT_SECS,
    DEFAULT_UPLOAD_EXTENSION, UploaderConfig, parse_config_file,
};
pub use crate::notifier::{Notifier, TracingNotifier};
pub use crate::status::StatusChannel;
pub use crate::transport::{
    BoxError, Connector, FilePart, FormPart, HttpConnector, PROTOCOL_VERSION, Transport,
    TransportError, UploadForm, VERSION_FIELD,
};
pub use crate::uploader::{StatusReport, Uploader};
pub use crate::worker::{CycleError, CycleSummary, LOOKING_FOR_FILES};

pub use calib_param::{CalibrationErrors, CalibrationResult, CameraParams};
pub use calib_upload_queue::{
    CameraFace, CameraInfo, DeviceInfo, DirQueueStore, QueueEntry, QueueStore, UploadMetadata,
};

/// Possible errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("calibration error: {0}")]
    Calibration(#[from] calib_param::Error),
    #[error("queue error: {0}")]
    Queue(#[from] calib_upload_queue::Error),
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("could not expand path: {0}")]
    ShellExpand(#[from] shellexpand::LookupError<std::env::VarError>),
    #[error("upload worker thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
