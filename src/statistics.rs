use crate::decoder::DecodedImage;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageStatistics {
    pub mean_intensity: f64,
    pub std_intensity: f64,
    /// `[height, width, channels]`
    pub shape: [u32; 3],
    /// Length of the encoded upload, not of the decoded buffer.
    pub size_bytes: usize,
}

/// Mean and population standard deviation over every channel of every pixel.
pub fn compute_statistics(image: &DecodedImage, encoded_len: usize) -> ImageStatistics {
    let (mean, std) = mean_and_std(image.pixels());
    ImageStatistics {
        mean_intensity: mean,
        std_intensity: std,
        shape: [image.height(), image.width(), u32::from(image.channels())],
        size_bytes: encoded_len,
    }
}

fn mean_and_std(values: &[u8]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let count = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / count;
    let variance = values
        .iter()
        .map(|&v| {
            let delta = f64::from(v) - mean;
            delta * delta
        })
        .sum::<f64>()
        / count;

    (mean, variance.sqrt())
}
