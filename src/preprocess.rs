use crate::error::{ServiceError, ServiceResult};
use image::imageops::FilterType;
use ndarray::{Array, Ix4};

pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

/// Resampling used for every resize. Bicubic, so results line up with
/// models trained on PIL-resized inputs.
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// NHWC `(1, 224, 224, 3)` tensor with RGB values scaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(Array<f32, Ix4>);

impl ImageTensor {
    pub fn shape() -> (usize, usize, usize, usize) {
        (1, INPUT_SIZE as usize, INPUT_SIZE as usize, CHANNELS)
    }

    pub fn zeros() -> Self {
        Self(Array::zeros(Self::shape()))
    }

    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.0.view()
    }
}

pub fn preprocess(image_data: &[u8]) -> ServiceResult<ImageTensor> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ServiceError::InvalidImage(format!("Error reading image: {}", e)))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| ServiceError::InvalidImage(format!("Error decoding image: {}", e)))?;

    tracing::debug!(
        "Decoded {}x{} image ({:?})",
        original_img.width(),
        original_img.height(),
        original_img.color()
    );

    // Drops alpha and expands grayscale before resizing.
    let rgb = original_img.to_rgb8();
    let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, RESIZE_FILTER);

    let values = resized
        .into_raw()
        .into_iter()
        .map(|v| (v as f32) / 255.)
        .collect::<Vec<f32>>();

    let input = Array::from_shape_vec(ImageTensor::shape(), values)
        .map_err(|e| ServiceError::InvalidImage(format!("Unexpected pixel buffer: {}", e)))?;

    Ok(ImageTensor(input))
}
