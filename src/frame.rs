use std::path::Path;

use image::{DynamicImage, GrayImage, ImageBuffer, RgbImage};

use crate::error::{Result, TrackerError};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    /// OpenCV channel order.
    Bgr8,
    Rgb8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
        }
    }
}

/// Owned, tightly packed 8-bit image.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(TrackerError::FrameSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn filled(width: u32, height: u32, format: PixelFormat, value: u8) -> Self {
        let len = width as usize * height as usize * format.channels();
        Self {
            data: vec![value; len],
            width,
            height,
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Single-channel copy, weighted the way `image` computes luma.
    pub fn to_gray(&self) -> Frame {
        match self.format {
            PixelFormat::Gray8 => self.clone(),
            _ => Frame::from(DynamicImage::ImageLuma8(self.to_dynamic_image().to_luma8())),
        }
    }

    pub fn open(path: &Path) -> Result<Frame> {
        let image = image::open(path).map_err(|source| TrackerError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Frame::from(image))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let image = self.to_dynamic_image();
        image.save(path).map_err(|source| TrackerError::ImageWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_dynamic_image(&self) -> DynamicImage {
        let (w, h) = (self.width, self.height);
        let image = match self.format {
            PixelFormat::Gray8 => {
                // Buffer length is checked in `Frame::new`.
                let buffer: Option<GrayImage> = ImageBuffer::from_raw(w, h, self.data.clone());
                buffer.map(DynamicImage::ImageLuma8)
            }
            PixelFormat::Rgb8 => {
                let buffer: Option<RgbImage> = ImageBuffer::from_raw(w, h, self.data.clone());
                buffer.map(DynamicImage::ImageRgb8)
            }
            PixelFormat::Bgr8 => {
                let rgb = self
                    .data
                    .chunks_exact(3)
                    .flat_map(|px| [px[2], px[1], px[0]])
                    .collect();
                let buffer: Option<RgbImage> = ImageBuffer::from_raw(w, h, rgb);
                buffer.map(DynamicImage::ImageRgb8)
            }
        };
        image.unwrap_or_else(|| DynamicImage::new_luma8(w, h))
    }
}

impl From<DynamicImage> for Frame {
    fn from(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => {
                let (width, height) = gray.dimensions();
                Frame {
                    data: gray.into_raw(),
                    width,
                    height,
                    format: PixelFormat::Gray8,
                }
            }
            other => {
                let rgb = other.into_rgb8();
                let (width, height) = rgb.dimensions();
                Frame {
                    data: rgb.into_raw(),
                    width,
                    height,
                    format: PixelFormat::Rgb8,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        let err = Frame::new(vec![0; 10], 2, 2, PixelFormat::Bgr8).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::FrameSize {
                expected: 12,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn gray_conversion_respects_channel_order() {
        let bgr = Frame::new(vec![255, 0, 0], 1, 1, PixelFormat::Bgr8).unwrap();
        let rgb = Frame::new(vec![255, 0, 0], 1, 1, PixelFormat::Rgb8).unwrap();
        let blue = Frame::new(vec![0, 0, 255], 1, 1, PixelFormat::Rgb8).unwrap();
        // pure blue vs pure red
        assert_eq!(bgr.to_gray(), blue.to_gray());
        assert!(rgb.to_gray().data()[0] > bgr.to_gray().data()[0]);
        assert_eq!(bgr.to_gray().format(), PixelFormat::Gray8);
    }

    #[test]
    fn gray_copy_leaves_source_untouched() {
        let frame = Frame::filled(4, 3, PixelFormat::Rgb8, 200);
        let before = frame.clone();
        let gray = frame.to_gray();
        assert_eq!(gray.data().len(), 12);
        assert_eq!(frame, before);
    }

    #[test]
    fn save_and_open_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::new(vec![10, 20, 30, 40, 50, 60], 2, 1, PixelFormat::Bgr8).unwrap();
        frame.save(&path).unwrap();

        let loaded = Frame::open(&path).unwrap();
        assert_eq!(loaded.format(), PixelFormat::Rgb8);
        assert_eq!(loaded.data(), &[30, 20, 10, 60, 50, 40]);
    }
}
