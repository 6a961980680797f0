//! Convert a raw camera calibration into scale-normalized intrinsic parameters.
//!
//! A calibration as delivered by OpenCV consists of a 3x3 camera matrix and a
//! set of radial and tangential distortion coefficients. The stored form
//! ([CameraParams]) keeps these in a 9 element "distortion factor" vector
//! `(k1, k2, p1, p2, fx, fy, x0, y0, s)` together with a 3x4 projection matrix
//! whose top-left 2x2 block is divided by the scale `s`. The scale is chosen
//! such that the undistorted image still covers the entire nominal frame.

use tracing::debug;

pub mod distortion;
pub mod param_file;

pub use distortion::{ideal_to_observed, observed_to_ideal};

/// Possible errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("camera matrix has {0} elements, at least 6 are required")]
    CameraMatrixTooShort(usize),
    #[error("invalid image size {width}x{height}")]
    InvalidImageSize { width: i32, height: i32 },
    #[error("unexpected parameter file size {0} (expected {expected})", expected = param_file::PARAM_FILE_SIZE)]
    UnexpectedParamFileSize(usize),
    #[error("io error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Version of the lens distortion model stored in [CameraParams].
///
/// Version 4 is the OpenCV model (k1, k2, p1, p2) with an additional scale
/// factor.
pub const DIST_FUNCTION_VERSION: i32 = 4;

/// Number of elements in the distortion factor vector.
pub const DIST_FACTOR_LEN: usize = 9;

/// Value used for distortion coefficients which were not supplied.
pub const DEFAULT_DISTORTION_COEFFICIENT: f64 = 0.0;

/// Seed for the minimum search in [size_factor]. Never a valid result.
const SIZE_FACTOR_SENTINEL: f64 = 100.0;

/// Distortion factors `(k1, k2, p1, p2, fx, fy, x0, y0, s)`.
pub type DistFactor = [f64; DIST_FACTOR_LEN];

/// A calibration as computed by the camera calibration routine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCalibration {
    /// camera calibration matrix, row major order
    pub camera_matrix: [f64; 9],
    /// distortion coefficients (k1, k2, p1, p2)
    pub distortion: [f64; 4],
    pub width: i32,
    pub height: i32,
}

impl RawCalibration {
    /// Build from the slices handed over by the calibration routine.
    ///
    /// Only `fx`, `x0`, `fy` and `y0` (indices 0, 2, 4 and 5) are read from
    /// `camera_matrix`. Coefficients beyond the fourth are ignored and missing
    /// ones are set to [DEFAULT_DISTORTION_COEFFICIENT].
    pub fn from_slices(
        camera_matrix: &[f64],
        distortion: &[f64],
        width: i32,
        height: i32,
    ) -> Result<Self> {
        if camera_matrix.len() < 6 {
            return Err(Error::CameraMatrixTooShort(camera_matrix.len()));
        }
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidImageSize { width, height });
        }
        let mut m = [0.0; 9];
        for (dest, src) in m.iter_mut().zip(camera_matrix.iter()) {
            *dest = *src;
        }
        let mut dist = [DEFAULT_DISTORTION_COEFFICIENT; 4];
        for (dest, src) in dist.iter_mut().zip(distortion.iter()) {
            *dest = *src;
        }
        Ok(Self {
            camera_matrix: m,
            distortion: dist,
            width,
            height,
        })
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[0]
    }
    pub fn x0(&self) -> f64 {
        self.camera_matrix[2]
    }
    pub fn fy(&self) -> f64 {
        self.camera_matrix[4]
    }
    pub fn y0(&self) -> f64 {
        self.camera_matrix[5]
    }
}

/// Reprojection error statistics of a calibration, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationErrors {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

/// Normalized intrinsic parameters, as stored in a camera parameter file.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraParams {
    pub xsize: i32,
    pub ysize: i32,
    /// projection matrix, top-left 2x2 block divided by `dist_factor[8]`
    pub mat: [[f64; 4]; 3],
    pub dist_factor: DistFactor,
    pub dist_function_version: i32,
}

impl CameraParams {
    /// The scale factor applied to the projection matrix.
    pub fn scale(&self) -> f64 {
        self.dist_factor[8]
    }
}

/// A finished calibration: normalized parameters plus error statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub params: CameraParams,
    pub errors: CalibrationErrors,
}

/// Compute the normalized parameters for `raw`.
pub fn normalize(raw: &RawCalibration, errors: CalibrationErrors) -> CalibrationResult {
    let (fx, fy, x0, y0) = (raw.fx(), raw.fy(), raw.x0(), raw.y0());
    let [k1, k2, p1, p2] = raw.distortion;

    let mut dist_factor = [k1, k2, p1, p2, fx, fy, x0, y0, 1.0];
    let mut mat = [
        [fx, 0.0, x0, 0.0],
        [0.0, fy, y0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];

    let s = size_factor(&dist_factor, raw.width, raw.height);
    for row in mat.iter_mut().take(2) {
        for el in row.iter_mut().take(2) {
            *el /= s;
        }
    }
    dist_factor[8] = s;
    debug!(
        "normalized {}x{} calibration with scale factor {s}",
        raw.width, raw.height
    );

    CalibrationResult {
        params: CameraParams {
            xsize: raw.width,
            ysize: raw.height,
            mat,
            dist_factor,
            dist_function_version: DIST_FUNCTION_VERSION,
        },
        errors,
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Low,
    High,
}

/// One observed boundary point. `None` places the probe on the distortion
/// center along that axis.
struct Probe {
    x: Option<Edge>,
    y: Option<Edge>,
}

const PROBES: [Probe; 8] = [
    Probe { x: Some(Edge::Low), y: None },
    Probe { x: Some(Edge::High), y: None },
    Probe { x: None, y: Some(Edge::Low) },
    Probe { x: None, y: Some(Edge::High) },
    Probe { x: Some(Edge::Low), y: Some(Edge::Low) },
    Probe { x: Some(Edge::High), y: Some(Edge::Low) },
    Probe { x: Some(Edge::Low), y: Some(Edge::High) },
    Probe { x: Some(Edge::High), y: Some(Edge::High) },
];

fn observed_coord(edge: Option<Edge>, center: f64, size: f64) -> f64 {
    match edge {
        None => center,
        Some(Edge::Low) => 0.0,
        Some(Edge::High) => size,
    }
}

/// Candidate ratio `ilen / olen` along one axis, if the ideal length is
/// positive.
fn axis_ratio(edge: Edge, center: f64, size: f64, ideal: f64) -> Option<f64> {
    let (olen, ilen) = match edge {
        Edge::Low => (center, center - ideal),
        Edge::High => (size - center, ideal - center),
    };
    if ilen > 0.0 { Some(ilen / olen) } else { None }
}

/// Find the scale which keeps the undistorted image covering the frame.
///
/// Boundary points of the observed `xsize` x `ysize` image are mapped to ideal
/// coordinates and the smallest ratio of ideal to observed distance from the
/// distortion center (`dist_factor[6]`, `dist_factor[7]`) is returned. If no
/// probe has a positive ideal distance, 1.0 is returned.
pub fn size_factor(dist_factor: &DistFactor, xsize: i32, ysize: i32) -> f64 {
    let (x0, y0) = (dist_factor[6], dist_factor[7]);
    let (w, h) = (xsize as f64, ysize as f64);

    let mut sf = SIZE_FACTOR_SENTINEL;
    for probe in PROBES.iter() {
        let ox = observed_coord(probe.x, x0, w);
        let oy = observed_coord(probe.y, y0, h);
        let (ix, iy) = observed_to_ideal(dist_factor, ox, oy);

        let rx = probe.x.and_then(|edge| axis_ratio(edge, x0, w, ix));
        let ry = probe.y.and_then(|edge| axis_ratio(edge, y0, h, iy));
        for ratio in [rx, ry].into_iter().flatten() {
            if ratio < sf {
                sf = ratio;
            }
        }
    }

    if sf == SIZE_FACTOR_SENTINEL { 1.0 } else { sf }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn raw(k1: f64, k2: f64, p1: f64, p2: f64) -> RawCalibration {
        RawCalibration::from_slices(
            &[500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
            &[k1, k2, p1, p2],
            640,
            480,
        )
        .unwrap()
    }

    #[test]
    fn no_distortion_gives_unit_scale() {
        let result = normalize(&raw(0.0, 0.0, 0.0, 0.0), CalibrationErrors::default());
        assert_relative_eq!(result.params.scale(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(result.params.mat[0][0], 500.0, epsilon = 1e-9);
        assert_relative_eq!(result.params.mat[1][1], 500.0, epsilon = 1e-9);
        assert_eq!(result.params.mat[0][2], 320.0);
        assert_eq!(result.params.mat[2], [0.0, 0.0, 1.0, 0.0]);
        assert_eq!(result.params.dist_function_version, DIST_FUNCTION_VERSION);
    }

    #[test]
    fn sentinel_path_returns_one() {
        // Distortion center at the origin of an empty frame: no probe has a
        // positive ideal length.
        let df = [0.0, 0.0, 0.0, 0.0, 500.0, 500.0, 0.0, 0.0, 1.0];
        assert_eq!(size_factor(&df, 0, 0), 1.0);
    }

    #[test]
    fn size_factor_is_deterministic() {
        let df = [-0.2, 0.05, 0.001, -0.002, 510.0, 505.0, 318.0, 242.0, 1.0];
        let a = size_factor(&df, 640, 480);
        let b = size_factor(&df, 640, 480);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn pincushion_shrinks_and_barrel_grows() {
        let pincushion = normalize(&raw(0.1, 0.0, 0.0, 0.0), CalibrationErrors::default());
        assert!(pincushion.params.scale() < 1.0);

        let barrel = normalize(&raw(-0.1, 0.0, 0.0, 0.0), CalibrationErrors::default());
        assert!(barrel.params.scale() > 1.0);
    }

    #[test]
    fn matrix_is_divided_by_scale() {
        let result = normalize(&raw(0.1, 0.01, 0.0, 0.0), CalibrationErrors::default());
        let s = result.params.scale();
        assert_relative_eq!(result.params.mat[0][0] * s, 500.0, epsilon = 1e-9);
        assert_relative_eq!(result.params.mat[1][1] * s, 500.0, epsilon = 1e-9);
        // The principal point is not scaled.
        assert_eq!(result.params.mat[0][2], 320.0);
        assert_eq!(result.params.mat[1][2], 240.0);
        assert_eq!(result.params.dist_factor[4], 500.0);
    }

    #[test]
    fn missing_coefficients_default_to_zero() {
        let raw = RawCalibration::from_slices(
            &[500.0, 0.0, 320.0, 0.0, 500.0, 240.0],
            &[0.1],
            640,
            480,
        )
        .unwrap();
        assert_eq!(raw.distortion, [0.1, 0.0, 0.0, 0.0]);

        let raw = RawCalibration::from_slices(
            &[500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
            &[0.1, 0.2, 0.3, 0.4, 0.5],
            640,
            480,
        )
        .unwrap();
        assert_eq!(raw.distortion, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn rejects_short_matrix_and_empty_image() {
        assert!(matches!(
            RawCalibration::from_slices(&[1.0, 2.0, 3.0], &[], 640, 480),
            Err(Error::CameraMatrixTooShort(3))
        ));
        assert!(matches!(
            RawCalibration::from_slices(&[0.0; 9], &[], 0, 480),
            Err(Error::InvalidImageSize { .. })
        ));
    }
}
