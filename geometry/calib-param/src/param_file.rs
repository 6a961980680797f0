//! Binary camera parameter files (`camera_para.dat`).
//!
//! All values are big-endian: `xsize: i32`, `ysize: i32`, the 3x4 projection
//! matrix as 12 `f64` in row-major order, then the 9 `f64` distortion factors.
//! The distortion function version is implied by the file size.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{CameraParams, DIST_FACTOR_LEN, DIST_FUNCTION_VERSION, Error, Result};

/// Size in bytes of a version 4 parameter file.
pub const PARAM_FILE_SIZE: usize = 4 + 4 + 12 * 8 + DIST_FACTOR_LEN * 8;

/// Serialize `params` into a writer.
pub fn write<W: Write>(mut wtr: W, params: &CameraParams) -> Result<()> {
    wtr.write_i32::<BigEndian>(params.xsize)?;
    wtr.write_i32::<BigEndian>(params.ysize)?;
    for row in params.mat.iter() {
        for el in row.iter() {
            wtr.write_f64::<BigEndian>(*el)?;
        }
    }
    for el in params.dist_factor.iter() {
        wtr.write_f64::<BigEndian>(*el)?;
    }
    Ok(())
}

/// Serialize `params` into a new buffer.
pub fn to_bytes(params: &CameraParams) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PARAM_FILE_SIZE);
    // Writing into a Vec cannot fail.
    let _ = write(&mut buf, params);
    buf
}

/// Parse a complete parameter file.
pub fn from_bytes(buf: &[u8]) -> Result<CameraParams> {
    if buf.len() != PARAM_FILE_SIZE {
        return Err(Error::UnexpectedParamFileSize(buf.len()));
    }
    let mut rdr = buf;
    let xsize = rdr.read_i32::<BigEndian>()?;
    let ysize = rdr.read_i32::<BigEndian>()?;
    let mut mat = [[0.0; 4]; 3];
    for row in mat.iter_mut() {
        for el in row.iter_mut() {
            *el = rdr.read_f64::<BigEndian>()?;
        }
    }
    let mut dist_factor = [0.0; DIST_FACTOR_LEN];
    for el in dist_factor.iter_mut() {
        *el = rdr.read_f64::<BigEndian>()?;
    }
    Ok(CameraParams {
        xsize,
        ysize,
        mat,
        dist_factor,
        dist_function_version: DIST_FUNCTION_VERSION,
    })
}

/// Read a parameter file from a reader.
pub fn read<R: Read>(mut rdr: R) -> Result<CameraParams> {
    let mut buf = Vec::with_capacity(PARAM_FILE_SIZE);
    rdr.read_to_end(&mut buf)?;
    from_bytes(&buf)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CalibrationErrors, RawCalibration, normalize};

    use test_log::test;

    fn sample() -> CameraParams {
        let raw = RawCalibration::from_slices(
            &[812.5, 0.0, 401.2, 0.0, 809.75, 297.0, 0.0, 0.0, 1.0],
            &[-0.21, 0.08, 0.0012, -0.0007],
            800,
            600,
        )
        .unwrap();
        normalize(&raw, CalibrationErrors::default()).params
    }

    #[test]
    fn header_is_big_endian() {
        let buf = to_bytes(&sample());
        assert_eq!(buf.len(), PARAM_FILE_SIZE);
        assert_eq!(&buf[0..4], &800i32.to_be_bytes());
        assert_eq!(&buf[4..8], &600i32.to_be_bytes());
        let scale = sample().scale();
        assert_eq!(&buf[PARAM_FILE_SIZE - 8..], &scale.to_be_bytes());
    }

    #[test]
    fn saved_file_reads_back() -> Result<()> {
        let tempdir = tempfile::tempdir()?;
        let fname = tempdir.path().join("camera_para.dat");
        let params = sample();
        write(std::fs::File::create(&fname)?, &params)?;
        let loaded = read(std::fs::File::open(&fname)?)?;
        assert_eq!(loaded, params);
        Ok(())
    }

    #[test]
    fn truncated_file_is_rejected() {
        let buf = to_bytes(&sample());
        assert!(matches!(
            from_bytes(&buf[..100]),
            Err(Error::UnexpectedParamFileSize(100))
        ));
    }
}
