use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{error, info, warn};

use calib_param::{CalibrationErrors, CalibrationResult, RawCalibration, param_file};
use calib_upload_queue::{DeviceInfo, DirQueueStore, QueueStore, UploadMetadata, ensure_dir};

use crate::{
    Connector, Error, HttpConnector, Notifier, Result, StatusChannel, UploaderConfig,
    signal::WakeSignal,
    worker::{WorkerContext, worker_loop},
};

/// What [Uploader::poll_status] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Empty when there is nothing to show.
    pub text: String,
    /// `true` while an upload cycle runs.
    pub busy: bool,
}

/// Queues calibrations and uploads them on a background thread.
///
/// Dropping the uploader stops the worker and waits for it. A cycle in
/// progress is finished first.
pub struct Uploader {
    config: UploaderConfig,
    device: DeviceInfo,
    store: Arc<dyn QueueStore>,
    status: Arc<StatusChannel>,
    signal: Arc<WakeSignal>,
    worker: Option<JoinHandle<()>>,
}

impl Uploader {
    /// Create an uploader using a [DirQueueStore] and an [HttpConnector].
    ///
    /// A queue directory that cannot be created is logged but not fatal:
    /// the queue then reads as empty and publishing fails.
    pub fn initialize(
        config: UploaderConfig,
        device: DeviceInfo,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        if let Err(e) = ensure_dir(&config.queue_dir) {
            warn!("Error creating upload queue directory: {e}");
        }
        let mut store = DirQueueStore::new(&config.queue_dir, &config.upload_extension);
        if let Some(share_dir) = &config.share_dir {
            store = store.with_share_dir(share_dir);
        }
        let connector = HttpConnector::from_config(&config);
        Self::new(
            config,
            device,
            Arc::new(store),
            Box::new(connector),
            notifier,
        )
    }

    /// Create an uploader with explicit storage and network backends.
    pub fn new(
        config: UploaderConfig,
        device: DeviceInfo,
        store: Arc<dyn QueueStore>,
        connector: Box<dyn Connector>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let status = Arc::new(StatusChannel::new());
        let signal = Arc::new(WakeSignal::default());

        let ctx = WorkerContext {
            store: store.clone(),
            connector,
            notifier,
            status: status.clone(),
            signal: signal.clone(),
            endpoint_url: config.endpoint_url.clone(),
            status_hide: config.status_hide(),
        };
        let worker = std::thread::Builder::new()
            .name("calib-upload".to_string())
            .spawn(move || worker_loop(ctx))?;

        let uploader = Self {
            config,
            device,
            store,
            status,
            signal,
            worker: Some(worker),
        };
        if uploader.config.upload_on_start {
            uploader.signal();
        }
        Ok(uploader)
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Normalize a raw calibration, queue it and wake the worker.
    ///
    /// Missing distortion coefficients are taken as zero. The normalized
    /// result is returned even though the upload happens later.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_result(
        &self,
        camera_matrix: &[f64],
        distortion_coefficients: &[f64],
        width: i32,
        height: i32,
        err_avg: f64,
        err_min: f64,
        err_max: f64,
    ) -> Result<CalibrationResult> {
        let raw =
            RawCalibration::from_slices(camera_matrix, distortion_coefficients, width, height)?;
        let errors = CalibrationErrors {
            min: err_min,
            avg: err_avg,
            max: err_max,
        };
        let result = calib_param::normalize(&raw, errors);
        let payload = param_file::to_bytes(&result.params);

        let metadata = UploadMetadata {
            timestamp: chrono::Utc::now(),
            device: self.device.clone(),
            camera: self.config.camera.clone(),
            width,
            height,
            errors,
            auth_token: self.config.auth_token.clone(),
        };
        let entry = self.store.publish(&payload, &metadata).inspect_err(|e| {
            error!("Error queueing calibration: {e}");
        })?;
        info!(
            "queued calibration with scale factor {} as \"{}\"",
            result.params.scale(),
            entry.index_path().display()
        );

        self.signal();
        Ok(result)
    }

    /// Ask the worker to run an upload cycle.
    pub fn signal(&self) {
        self.signal.signal();
    }

    /// The current status text and whether a cycle is running, read
    /// together.
    pub fn poll_status(&self, now: Instant) -> StatusReport {
        self.signal.with_busy(|busy| StatusReport {
            text: self.status.get(now),
            busy,
        })
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            self.signal.request_quit();
            worker.join().map_err(|_| Error::WorkerPanicked)?;
        }
        Ok(())
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Error stopping upload worker: {e}");
        }
    }
}
