use crate::config::ModelConfig;
use crate::decoder::DecodedImage;
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use ndarray::{Array, ArrayView4, Ix4};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("Cannot preprocess an image with zero area")]
    ZeroArea,
    #[error("Unsupported model input channel count: {0}")]
    UnsupportedChannels(u32),
}

/// Target geometry of the model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl InputSpec {
    /// NHWC with a batch of one.
    pub fn shape(&self) -> [usize; 4] {
        [
            1,
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        ]
    }
}

impl From<&ModelConfig> for InputSpec {
    fn from(config: &ModelConfig) -> Self {
        Self {
            width: config.width(),
            height: config.height(),
            channels: config.input_channels,
        }
    }
}

/// Model input of shape `[1, height, width, channels]`, values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct PreprocessedTensor {
    data: Array<f32, Ix4>,
}

impl PreprocessedTensor {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }
}

/// Resizes with bilinear filtering, converts to the model's channel count and
/// scales to `[0, 1]`.
///
/// Color images fed to a grayscale model are reduced with BT.601 luma and
/// alpha is discarded; grayscale images fed to an RGB model have their luma
/// replicated across all three channels.
pub fn preprocess(
    image: &DecodedImage,
    spec: InputSpec,
) -> Result<PreprocessedTensor, PreprocessError> {
    if image.width() == 0 || image.height() == 0 || spec.width == 0 || spec.height == 0 {
        return Err(PreprocessError::ZeroArea);
    }

    let (width, height) = (spec.width, spec.height);
    let mut input: Array<f32, Ix4> = Array::zeros(spec.shape());

    match spec.channels {
        1 => {
            let gray = DynamicImage::ImageLuma8(to_grayscale(image.image()));
            let resized = gray.resize_exact(width, height, FilterType::Triangle).to_luma8();
            for (x, y, pixel) in resized.enumerate_pixels() {
                input[[0, y as usize, x as usize, 0]] = (pixel.0[0] as f32) / 255.;
            }
        }
        3 => {
            let rgb = DynamicImage::ImageRgb8(image.image().to_rgb8());
            let resized = rgb.resize_exact(width, height, FilterType::Triangle).to_rgb8();
            for (x, y, pixel) in resized.enumerate_pixels() {
                let [r, g, b] = pixel.0;
                let (x, y) = (x as usize, y as usize);
                input[[0, y, x, 0]] = (r as f32) / 255.;
                input[[0, y, x, 1]] = (g as f32) / 255.;
                input[[0, y, x, 2]] = (b as f32) / 255.;
            }
        }
        other => return Err(PreprocessError::UnsupportedChannels(other)),
    }

    Ok(PreprocessedTensor { data: input })
}

fn to_grayscale(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }

    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114 + 500) / 1000;
        Luma([luma as u8])
    })
}
