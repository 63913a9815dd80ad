//! OpenCV implementations of the vision seams, the video source and the
//! on-screen windows.

mod backend;
mod video;
mod window;

pub use backend::OpenCvBackend;
pub use video::VideoSource;
pub use window::{imshow_multi, PreviewWindow, WindowOperator};

use nalgebra::{Dim, Matrix, Scalar, Storage};
use opencv::{
    core::{self, Mat, CV_64FC1, CV_8UC1, CV_8UC3, CV_8UC4},
    imgproc::{cvt_color, COLOR_BGRA2BGR, COLOR_GRAY2BGR, COLOR_RGB2BGR},
    prelude::*,
};
use simba::scalar::SubsetOf;

use crate::{
    error::{Result, TrackerError},
    frame::{Frame, PixelFormat},
};

/// Convert a [`nalgebra::Matrix`] to a CV_64FC1 [`opencv::core::Mat`]
pub fn nalg_to_mat<T, R, C, S>(mat: &Matrix<T, R, C, S>) -> Result<Mat>
where
    T: SubsetOf<f64> + Scalar,
    R: Dim,
    C: Dim,
    S: Storage<T, R, C>,
{
    let mut out = Mat::new_rows_cols_with_default(
        mat.nrows() as i32,
        mat.ncols() as i32,
        CV_64FC1,
        core::Scalar::all(0.0),
    )?;
    for (r, row) in mat.row_iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            *out.at_2d_mut::<f64>(r as i32, c as i32)? = nalgebra::convert_ref(v);
        }
    }
    Ok(out)
}

/// Copies a frame into a Mat. Colour frames end up BGR.
pub fn frame_to_mat(frame: &Frame) -> Result<Mat> {
    let typ = match frame.format() {
        PixelFormat::Gray8 => CV_8UC1,
        PixelFormat::Bgr8 | PixelFormat::Rgb8 => CV_8UC3,
    };
    let mut mat = Mat::new_rows_cols_with_default(
        frame.height() as i32,
        frame.width() as i32,
        typ,
        core::Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(frame.data());
    if frame.format() == PixelFormat::Rgb8 {
        let mut bgr = Mat::default();
        cvt_color(&mat, &mut bgr, COLOR_RGB2BGR, 0)?;
        return Ok(bgr);
    }
    Ok(mat)
}

/// Like [`frame_to_mat`], but gray frames are expanded to three channels so
/// coloured drawing shows up.
pub fn frame_to_bgr_mat(frame: &Frame) -> Result<Mat> {
    let mat = frame_to_mat(frame)?;
    if frame.format() != PixelFormat::Gray8 {
        return Ok(mat);
    }
    let mut bgr = Mat::default();
    cvt_color(&mat, &mut bgr, COLOR_GRAY2BGR, 0)?;
    Ok(bgr)
}

pub fn mat_to_frame(mat: &Mat) -> Result<Frame> {
    let typ = mat.typ();
    let (mat, format) = if typ == CV_8UC1 {
        (mat.try_clone()?, PixelFormat::Gray8)
    } else if typ == CV_8UC3 {
        (mat.try_clone()?, PixelFormat::Bgr8)
    } else if typ == CV_8UC4 {
        let mut bgr = Mat::default();
        cvt_color(mat, &mut bgr, COLOR_BGRA2BGR, 0)?;
        (bgr, PixelFormat::Bgr8)
    } else {
        return Err(TrackerError::Vision(format!("unsupported Mat type {typ}")));
    };
    let data = mat.data_bytes()?.to_vec();
    Frame::new(data, mat.cols() as u32, mat.rows() as u32, format)
}
